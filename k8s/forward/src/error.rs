use snafu::Snafu;
use std::{path::PathBuf, time::Duration};

/// Errors generated while setting up or running a port forward session.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    #[snafu(display("Failed to find an unused local port: {}", source))]
    /// Binding an ephemeral local port failed.
    PortAllocation {
        /// The bind error.
        source: std::io::Error,
    },
    #[snafu(display("Local port {} not ready after {:?}", port, waited))]
    /// A local port did not reach the expected state within the maximum wait.
    ReadinessTimeout {
        /// The local port.
        port: u16,
        /// How long we waited for.
        waited: Duration,
    },

    #[snafu(display("kubeconfig file not found in default location"))]
    /// No kubeconfig path given and none found in the environment.
    KubeConfigNotFound {},
    #[snafu(display("Failed to read kubeconfig '{}': {}", path.display(), source))]
    /// The kubeconfig file could not be read or parsed.
    KubeConfigRead {
        /// Path of the kubeconfig file.
        path: PathBuf,
        /// The read or parse error.
        source: kube::config::KubeconfigError,
    },
    #[snafu(display("Invalid kubeconfig: {}", source))]
    /// The kubeconfig could not be turned into a client configuration.
    KubeConfig {
        /// The configuration error.
        source: kube::config::KubeconfigError,
    },
    #[snafu(display("Failed to connect to Kubernetes: {}", source))]
    /// The kubernetes client could not be created.
    KubeClient {
        /// The client error.
        source: kube::Error,
    },

    #[snafu(display("Failed to list pods matching '{}': {}", selector, source))]
    /// Listing the pods failed.
    PodList {
        /// The label selector.
        selector: String,
        /// The kube-api error.
        source: kube::Error,
    },
    #[snafu(display("No pod matching '{}' found in {}", selector, namespace))]
    /// No pod matches the selector.
    NoPods {
        /// The label selector.
        selector: String,
        /// The namespace searched, or all namespaces.
        namespace: String,
    },
    #[snafu(display(
        "Found {} pods matching '{}', set the namespace to one of: {}",
        count,
        selector,
        namespaces.join(" ")
    ))]
    /// More than one pod matches the selector.
    AmbiguousPods {
        /// Number of matching pods.
        count: usize,
        /// The label selector.
        selector: String,
        /// Namespace of each matching pod.
        namespaces: Vec<String>,
    },
    #[snafu(display("Port '{}' not found in pod '{}'", port, pod))]
    /// A named target port is not declared by any container of the pod.
    PodPortNotFound {
        /// Name of the pod.
        pod: String,
        /// Name of the port.
        port: String,
    },
    #[snafu(display("Port {} is not a valid port number", port))]
    /// A port number is out of range.
    InvalidPort {
        /// The declared port number.
        port: i32,
    },

    #[snafu(display("Failed to list services matching '{}' in {}: {}", selector, namespace, source))]
    /// Listing the services failed.
    ServiceList {
        /// The label selector.
        selector: String,
        /// Namespace of the pod.
        namespace: String,
        /// The kube-api error.
        source: kube::Error,
    },
    #[snafu(display("Service '{}' not found in {}", selector, namespace))]
    /// No service matches the selector.
    NoService {
        /// The label selector.
        selector: String,
        /// Namespace of the pod.
        namespace: String,
    },
    #[snafu(display("No port of service '{}' matches the {} selection", service, selection))]
    /// The service declares no port matching the selection rule.
    NoServicePort {
        /// Name of the service.
        service: String,
        /// The port selection rule.
        selection: String,
    },

    #[snafu(display("Failed to start port forward to pod '{}': {}", pod, source))]
    /// The port forward stream to the pod could not be established.
    TransportSetup {
        /// Name of the pod.
        pod: String,
        /// The kube-api error.
        source: kube::Error,
    },
    #[snafu(display("Failed to bind local port {}: {}", port, source))]
    /// The tunnel could not bind its local port.
    TunnelBind {
        /// The local port.
        port: u16,
        /// The bind error.
        source: std::io::Error,
    },
    #[snafu(display("Port forward to pod '{}' failed: {}", pod, reason))]
    /// The port forward stream failed while relaying.
    TunnelRuntime {
        /// Name of the pod.
        pod: String,
        /// What went wrong.
        reason: String,
    },
    #[snafu(display("Port forward on local port {} stopped before becoming ready", port))]
    /// The tunnel exited before signalling readiness.
    TunnelStopped {
        /// The local port.
        port: u16,
    },
    #[snafu(display("Port forward task failed: {}", source))]
    /// The tunnel task panicked or was aborted.
    TunnelJoin {
        /// The join error.
        source: tokio::task::JoinError,
    },
}

impl Error {
    /// Whether this error was generated while resolving the target pod and service.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::PodList { .. }
                | Self::NoPods { .. }
                | Self::AmbiguousPods { .. }
                | Self::PodPortNotFound { .. }
                | Self::InvalidPort { .. }
                | Self::ServiceList { .. }
                | Self::NoService { .. }
                | Self::NoServicePort { .. }
        )
    }
}
