//! Argument handling of the `kubectl-tunnel` plugin.

use clap::Parser;
use kube_portforward::{
    ConnectionDescriptor, Readiness, Selector, ServicePortSelection, SessionConfig,
};
use std::path::PathBuf;
use utils::tracing_telemetry::FmtStyle;

pub mod shutdown;

/// Forward a free local port to the single pod matching a label selector and print the port.
/// The port forward runs until SIGINT or SIGTERM is received.
#[derive(Parser, Debug)]
#[command(name = "kubectl-tunnel", version, about)]
pub struct CliArgs {
    /// Path to kubeconfig file.
    #[arg(long, short = 'k')]
    pub kube_config_path: Option<PathBuf>,

    /// The kubeconfig context to use, defaults to the current context.
    #[arg(long)]
    pub context: Option<String>,

    /// Kubernetes namespace of the target pod, all namespaces if empty.
    #[arg(long, short = 'n', env = utils::TUNNEL_NAMESPACE_ENV, default_value = "")]
    pub namespace: String,

    /// Label selector of the target pod and service, eg: app=ctrl.
    #[arg(long, short = 'l')]
    pub selector: String,

    /// Which port of the service provides the target port: last, first, a port number or a
    /// port name. Prefix the name with `name:` when the port is named like a number, `first`
    /// or `last`.
    #[arg(long, default_value = "last")]
    pub service_port: ServicePortSelection,

    /// How to wait for the port forward to accept connections: signal or poll.
    #[arg(long, default_value = "signal")]
    pub readiness: Readiness,

    /// Give up if the local port is not ready within this time, eg: 30s.
    /// Waits forever if unset.
    #[arg(long)]
    pub max_wait: Option<humantime::Duration>,

    /// Verbosity of the traces, repeat to increase it.
    /// From -vv the tunnel connection events are shown as well.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Formatting style of the traces: compact, pretty or json.
    #[arg(long, default_value = "compact")]
    pub fmt_style: FmtStyle,
}

impl CliArgs {
    /// Get the cluster connection descriptor.
    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::new(self.kube_config_path.clone()).with_context(self.context.clone())
    }
    /// Get the target selector.
    pub fn target(&self) -> Selector {
        Selector::new(self.selector.as_str(), self.namespace.as_str())
    }
    /// Get the session configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_port_selection(self.service_port.clone())
            .with_readiness(self.readiness)
            .with_max_wait(self.max_wait.map(|max_wait| *max_wait))
    }
}
