use crate::{
    allocate_free_port,
    error::{Error, ReadinessTimeoutSnafu, TunnelStoppedSnafu},
    port_forward::{KubeTransport, StreamTransport, Tunnel, TunnelHandle},
    resolver::{ClusterApi, KubeCluster, ResolvedTarget, Resolver, ServicePortSelection},
    ConnectionDescriptor, PortProbe, Selector,
};
use std::time::Duration;

/// How the session learns that the tunnel is ready.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, strum_macros::EnumString, strum_macros::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Readiness {
    /// Wait for the tunnel's own signal that its local port is bound.
    #[default]
    Signal,
    /// Poll the local port with connection attempts until one succeeds.
    Poll,
}

/// Configuration of a `PortForwardSession`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    port_selection: ServicePortSelection,
    readiness: Readiness,
    poll_interval: Duration,
    max_wait: Option<Duration>,
}
impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_selection: ServicePortSelection::default(),
            readiness: Readiness::default(),
            poll_interval: utils::PORT_POLL_INTERVAL,
            max_wait: None,
        }
    }
}
impl SessionConfig {
    /// Move self with the following service port selection.
    pub fn with_port_selection(mut self, port_selection: ServicePortSelection) -> Self {
        self.port_selection = port_selection;
        self
    }
    /// Move self with the following readiness mode.
    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }
    /// Move self with the following pause between port probes.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
    /// Move self with the following maximum wait for each local port condition.
    /// None waits forever.
    pub fn with_max_wait<W: Into<Option<Duration>>>(mut self, max_wait: W) -> Self {
        self.max_wait = max_wait.into();
        self
    }
}

/// Port forward a free local port to a pod on the cluster and return the port once
/// the forward accepts connections.
/// The tunnel is detached and keeps running in the background.
pub async fn setup(
    descriptor: &ConnectionDescriptor,
    namespace: &str,
    label_selector: &str,
) -> Result<String, Error> {
    let selector = Selector::new(label_selector, namespace);
    let session =
        PortForwardSession::setup(descriptor, &selector, SessionConfig::default()).await?;
    Ok(session.detach())
}

/// A port forward from a local port to a single pod.
/// Dropping the session detaches the tunnel rather than stopping it.
pub struct PortForwardSession {
    target: ResolvedTarget,
    tunnel: TunnelHandle,
}

impl PortForwardSession {
    /// Sets up a port forward to the pod found by the selector, using the kube-api.
    pub async fn setup(
        descriptor: &ConnectionDescriptor,
        selector: &Selector,
        config: SessionConfig,
    ) -> Result<Self, Error> {
        tracing::debug!(
            selector = selector.label_selector(),
            namespace = ?selector.namespace(),
            kube_config = ?descriptor.kube_config_path().ok(),
            "Setting up port forward"
        );
        let client = descriptor.client().await?;
        Self::setup_with(
            KubeCluster::new(client.clone()),
            KubeTransport::new(client),
            selector,
            config,
        )
        .await
    }

    /// Sets up a port forward using the given cluster and transport.
    /// 1. allocate a free local port and wait until nothing listens on it
    /// 2. resolve the single pod and its target port
    /// 3. launch the tunnel and wait until it's ready
    pub async fn setup_with<C: ClusterApi, T: StreamTransport>(
        cluster: C,
        transport: T,
        selector: &Selector,
        config: SessionConfig,
    ) -> Result<Self, Error> {
        let local_port = allocate_free_port()?;
        let probe = PortProbe::new(local_port)
            .with_interval(config.poll_interval)
            .with_max_wait(config.max_wait);

        tracing::debug!(local_port, "Waiting for local port");
        probe.wait_until_free().await?;

        let target = Resolver::new(cluster)
            .with_port_selection(config.port_selection)
            .resolve(selector)
            .await?;

        tracing::debug!(
            local_port,
            pod = target.pod_name(),
            namespace = target.pod_namespace(),
            port = %target.target_port(),
            "Starting port forward"
        );
        let mut tunnel = Tunnel::new(transport, target.clone(), local_port).launch();

        tracing::debug!(
            local_port,
            readiness = config.readiness.as_ref(),
            "Waiting for port forward to start"
        );
        let ready = match config.readiness {
            Readiness::Signal => Self::await_signal(&mut tunnel, config.max_wait).await,
            Readiness::Poll => Self::await_poll(&mut tunnel, &probe).await,
        };
        if let Err(error) = ready {
            tunnel.abort();
            return Err(error);
        }

        tracing::info!(local_port, pod = target.pod_name(), "Port forward started");
        Ok(Self { target, tunnel })
    }

    async fn await_signal(
        tunnel: &mut TunnelHandle,
        max_wait: Option<Duration>,
    ) -> Result<(), Error> {
        let Some(max_wait) = max_wait else {
            return tunnel.ready().await;
        };
        let port = tunnel.local_port();
        match tokio::time::timeout(max_wait, tunnel.ready()).await {
            Ok(result) => result,
            Err(_) => ReadinessTimeoutSnafu {
                port,
                waited: max_wait,
            }
            .fail(),
        }
    }

    /// Polls the local port while watching the tunnel, which may exit before anything
    /// listens. A successful probe may have reached another process holding the port, so
    /// the tunnel must still confirm it bound the port itself.
    async fn await_poll(tunnel: &mut TunnelHandle, probe: &PortProbe) -> Result<(), Error> {
        let port = tunnel.local_port();
        let polled = tokio::select! {
            polled = probe.wait_until_listening() => polled,
            exited = tunnel.join() => {
                return exited.and_then(|()| TunnelStoppedSnafu { port }.fail());
            }
        };
        polled?;
        tunnel.ready().await
    }

    /// The local port of the forward.
    pub fn local_port(&self) -> u16 {
        self.tunnel.local_port()
    }
    /// The local port of the forward, as a string.
    pub fn local_port_str(&self) -> String {
        self.local_port().to_string()
    }
    /// The pod and port being forwarded to.
    pub fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    /// Stop the forward and release the local port.
    pub async fn stop(self) -> Result<(), Error> {
        tracing::debug!(local_port = self.local_port(), "Stopping port forward");
        self.tunnel.stop().await
    }
    /// Wait for the forward to exit, which only happens on error or when stopped.
    pub async fn wait(&mut self) -> Result<(), Error> {
        self.tunnel.join().await
    }
    /// Let the forward run in the background for the lifetime of the runtime and return
    /// its local port.
    pub fn detach(self) -> String {
        self.local_port_str()
    }
}
