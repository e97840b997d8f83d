use crate::error::{Error, PortAllocationSnafu, ReadinessTimeoutSnafu};
use snafu::ResultExt;
use std::{
    net::{SocketAddr, TcpListener},
    time::Duration,
};
use tokio::{net::TcpStream, time::Instant};

/// Find an unused local port.
/// Port 0 tells the kernel to give us the next free port, which we read back and release
/// straight away. Nothing reserves the port once this returns.
pub fn allocate_free_port() -> Result<u16, Error> {
    let listener =
        TcpListener::bind(SocketAddr::from((utils::LOCALHOST, 0))).context(PortAllocationSnafu)?;
    let port = listener.local_addr().context(PortAllocationSnafu)?.port();
    drop(listener);
    tracing::trace!(port, "Allocated free local port");
    Ok(port)
}

/// Block until nothing is listening on the given local port.
pub async fn wait_until_port_free(port: u16) -> Result<(), Error> {
    PortProbe::new(port).wait_until_free().await
}

/// Block until something is listening on the given local port.
pub async fn wait_until_port_listening(port: u16) -> Result<(), Error> {
    PortProbe::new(port).wait_until_listening().await
}

/// Probes a local port by attempting short lived connections to it.
/// Without a maximum wait the probe polls forever.
#[derive(Debug, Clone)]
pub struct PortProbe {
    port: u16,
    interval: Duration,
    connect_timeout: Duration,
    max_wait: Option<Duration>,
}

impl PortProbe {
    /// Return a new `Self` for the given local port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            interval: utils::PORT_POLL_INTERVAL,
            connect_timeout: utils::PORT_PROBE_TIMEOUT,
            max_wait: None,
        }
    }
    /// Move self with the following pause between probes.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
    /// Move self with the following connect timeout.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
    /// Move self with the following maximum wait, after which probing fails.
    pub fn with_max_wait<W: Into<Option<Duration>>>(mut self, max_wait: W) -> Self {
        self.max_wait = max_wait.into();
        self
    }
    /// The probed port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether a connection to the port can currently be established.
    pub async fn is_listening(&self) -> bool {
        let addr = SocketAddr::from((utils::LOCALHOST, self.port));
        matches!(
            tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }

    /// Poll until nothing is listening on the port.
    pub async fn wait_until_free(&self) -> Result<(), Error> {
        self.wait_until(false).await
    }

    /// Poll until something is listening on the port.
    pub async fn wait_until_listening(&self) -> Result<(), Error> {
        self.wait_until(true).await
    }

    async fn wait_until(&self, listening: bool) -> Result<(), Error> {
        let start = Instant::now();
        loop {
            if self.is_listening().await == listening {
                return Ok(());
            }
            let waited = start.elapsed();
            if let Some(max_wait) = self.max_wait {
                if waited >= max_wait {
                    return ReadinessTimeoutSnafu {
                        port: self.port,
                        waited,
                    }
                    .fail();
                }
            }
            tracing::trace!(port = self.port, listening, ?waited, "Polling local port");
            tokio::time::sleep(self.interval).await;
        }
    }
}
