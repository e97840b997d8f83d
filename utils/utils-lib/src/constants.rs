//! Various common constants used by the port forward library and its plugin.

use std::time::Duration;

/// Environment variable which, if set, points to the kubeconfig file.
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Default location of the kubeconfig file, relative to the home directory.
pub const DEFAULT_KUBECONFIG_PATH: &str = ".kube/config";

/// Environment variable for the namespace of the target workload.
/// An empty namespace means all namespaces.
pub const TUNNEL_NAMESPACE_ENV: &str = "TUNNEL_NAMESPACE";

/// The address the local end of the tunnel binds to.
pub const LOCALHOST: [u8; 4] = [127, 0, 0, 1];

/// Pause between two readiness probes of a local port.
pub const PORT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Connect timeout of a single readiness probe.
pub const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(20);

/// Default log filter directives for noisy dependencies.
pub const RUST_LOG_QUIET_DEFAULTS: &str =
    "h2=info,hyper=info,tower=info,rustls=info,tokio_util=info,mio=info,kube_client=info";

/// Verbosity from which the per-connection tunnel events are surfaced.
pub const TUNNEL_TRACE_VERBOSITY: u8 = 2;
