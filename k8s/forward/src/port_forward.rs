use crate::{
    error::{
        Error, TransportSetupSnafu, TunnelBindSnafu, TunnelJoinSnafu, TunnelRuntimeSnafu,
        TunnelStoppedSnafu,
    },
    vx::Pod,
    ResolvedTarget,
};
use futures::{StreamExt, TryStreamExt};
use kube::{api::Api, Client};
use snafu::{OptionExt, ResultExt};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
};
use tokio_stream::wrappers::TcpListenerStream;

/// Capability to relay a local connection to a port of a pod over a single authenticated
/// streaming connection.
#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Relays the client connection to the target pod port until either side closes.
    async fn relay(&self, target: &ResolvedTarget, client_conn: TcpStream) -> Result<(), Error>;
}

/// `StreamTransport` using the kube-api port forward sub-resource of the pod.
#[derive(Clone)]
pub struct KubeTransport {
    client: Client,
}
impl KubeTransport {
    /// Return a new `Self` using the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl StreamTransport for KubeTransport {
    async fn relay(
        &self,
        target: &ResolvedTarget,
        mut client_conn: TcpStream,
    ) -> Result<(), Error> {
        let pod_name = target.pod_name();
        let pod_port = target.pod_port();
        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), target.pod_namespace());

        let mut forwarder = pod_api
            .portforward(pod_name, &[pod_port])
            .await
            .context(TransportSetupSnafu { pod: pod_name })?;

        let mut upstream_conn = forwarder.take_stream(pod_port).context(TunnelRuntimeSnafu {
            pod: pod_name,
            reason: "port not found in forwarder",
        })?;

        tracing::debug!(pod_port, pod_name, "forwarding connection");

        if let Err(error) = tokio::io::copy_bidirectional(&mut client_conn, &mut upstream_conn).await
        {
            tracing::trace!(pod_port, pod_name, ?error, "connection error");
        }

        drop(upstream_conn);
        forwarder
            .join()
            .await
            .map_err(|error| Error::TunnelRuntime {
                pod: pod_name.to_string(),
                reason: error.to_string(),
            })?;
        tracing::debug!(pod_port, pod_name, "connection closed");
        Ok(())
    }
}

/// Forwards a local port to the resolved pod port.
/// # Example
/// ```ignore
/// let transport = kube_portforward::KubeTransport::new(client);
/// let mut handle = kube_portforward::Tunnel::new(transport, target, local_port).launch();
///
/// handle.ready().await?;
/// handle.join().await?;
/// ```
pub struct Tunnel<T> {
    transport: Arc<T>,
    target: Arc<ResolvedTarget>,
    local_port: u16,
}

impl<T: StreamTransport> Tunnel<T> {
    /// Return a new `Self`.
    /// # Arguments
    /// * `transport` - relays the accepted connections to the pod
    /// * `target` - the pod and port we'll forward to
    /// * `local_port` - the local port to bind
    pub fn new(transport: T, target: ResolvedTarget, local_port: u16) -> Self {
        Self {
            transport: Arc::new(transport),
            target: Arc::new(target),
            local_port,
        }
    }

    /// Spawns the tunnel in the background.
    /// The returned handle signals when the local port is bound and can stop the tunnel.
    pub fn launch(self) -> TunnelHandle {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let local_port = self.local_port;

        let task = tokio::spawn(async move {
            let result = self.run(ready_tx, stop_rx).await;
            if let Err(error) = &result {
                tracing::error!(local_port, %error, "port forward failed");
            }
            result
        });

        TunnelHandle {
            local_port,
            ready: Some(ready_rx),
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Accepts local connections until a stop is requested.
    async fn run(
        self,
        ready: oneshot::Sender<()>,
        stop: oneshot::Receiver<()>,
    ) -> Result<(), Error> {
        let port = self.local_port;
        let addr = SocketAddr::from((utils::LOCALHOST, port));

        let bind = TcpListener::bind(addr)
            .await
            .context(TunnelBindSnafu { port })?;
        tracing::trace!(port, "Bound to local port");
        // the receiver may have given up waiting already
        ready.send(()).ok();

        let pod = self.target.pod_name().to_string();
        let server = TcpListenerStream::new(bind)
            .take_until(Self::stopped(stop))
            .try_for_each(move |client_conn| {
                let transport = self.transport.clone();
                let target = self.target.clone();

                async move {
                    if let Ok(peer_addr) = client_conn.peer_addr() {
                        tracing::trace!(%peer_addr, "new connection");
                    }

                    tokio::spawn(async move {
                        if let Err(error) = transport.relay(&target, client_conn).await {
                            tracing::error!(%error, "failed to forward connection");
                        }
                    });

                    // keep the server running
                    Ok(())
                }
            });

        server.await.map_err(|error| Error::TunnelRuntime {
            pod,
            reason: error.to_string(),
        })?;
        tracing::debug!(port, "Port forward stopped");
        Ok(())
    }

    /// Completes when a stop is sent.
    /// A dropped sender detaches the tunnel rather than stopping it.
    async fn stopped(stop: oneshot::Receiver<()>) {
        if stop.await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

/// Handle of a launched `Tunnel`.
/// Dropping the handle detaches the tunnel, which then runs until the runtime shuts down.
pub struct TunnelHandle {
    local_port: u16,
    ready: Option<oneshot::Receiver<()>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), Error>>>,
}

impl TunnelHandle {
    /// The local port of the tunnel.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Wait until the tunnel is bound to its local port.
    /// Returns the tunnel error if it exits before becoming ready.
    pub async fn ready(&mut self) -> Result<(), Error> {
        let Some(ready) = self.ready.take() else {
            return Ok(());
        };
        match ready.await {
            Ok(()) => Ok(()),
            Err(_) => match self.wait_task().await {
                Ok(()) => TunnelStoppedSnafu {
                    port: self.local_port,
                }
                .fail(),
                Err(error) => Err(error),
            },
        }
    }

    /// Stop the tunnel and wait for it to release the local port.
    /// Connections already being relayed are left to complete.
    pub async fn stop(mut self) -> Result<(), Error> {
        if let Some(stop) = self.stop.take() {
            // the tunnel may have already exited
            stop.send(()).ok();
        }
        self.wait_task().await
    }

    /// Abort the tunnel without waiting for it.
    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Wait for the tunnel to exit.
    /// Cancelling the wait leaves the tunnel running.
    pub async fn join(&mut self) -> Result<(), Error> {
        self.wait_task().await
    }

    async fn wait_task(&mut self) -> Result<(), Error> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let result = task.await;
        self.task = None;
        result.context(TunnelJoinSnafu)?
    }
}
