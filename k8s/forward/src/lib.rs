#![deny(missing_docs)]
//! This library forwards a free local port to a single pod of a kubernetes cluster.
//!
//! The pod is found by label selector, in a given namespace or across all namespaces, and
//! the remote port is taken from the target port of a service matching the same selector.
//! The byte relaying itself is delegated to the kube-api port forward sub-resource.
//!
//! # Example
//! ```ignore
//! let descriptor = kube_portforward::ConnectionDescriptor::default();
//! let selector = kube_portforward::Selector::new("app=ctrl", "ns1");
//! let session = kube_portforward::PortForwardSession::setup(
//!     &descriptor,
//!     &selector,
//!     kube_portforward::SessionConfig::default(),
//! )
//! .await?;
//! println!("listening on localhost:{}", session.local_port_str());
//! ```

mod error;
mod kubeconfig;
mod port;
mod port_forward;
mod resolver;
mod session;

pub use error::Error;
pub use kubeconfig::ConnectionDescriptor;
pub use port::{allocate_free_port, wait_until_port_free, wait_until_port_listening, PortProbe};
pub use port_forward::{KubeTransport, StreamTransport, Tunnel, TunnelHandle};
pub use resolver::{ClusterApi, KubeCluster, ResolvedTarget, Resolver, ServicePortSelection};
pub use session::{setup, PortForwardSession, Readiness, SessionConfig};

/// The kubernetes api version used throughout the crate.
pub(crate) use k8s_openapi::api::core::v1 as vx;

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Identifies the workload to forward to: a label selector and an optional namespace.
/// No namespace means all namespaces.
#[derive(Debug, Clone)]
pub struct Selector {
    label_selector: String,
    namespace: Option<String>,
}
impl Selector {
    /// Returns a new `Self` from the given parameters.
    /// # Arguments
    /// * `label_selector` - kubernetes label selector, eg: `app=ctrl`
    /// * `namespace` - target namespace, an empty one meaning all namespaces
    pub fn new(label_selector: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            label_selector: label_selector.into(),
            namespace: Self::non_empty(namespace.into()),
        }
    }
    /// New `Self` with the given label selector, across all namespaces.
    pub fn all_namespaces(label_selector: impl Into<String>) -> Self {
        Self {
            label_selector: label_selector.into(),
            namespace: None,
        }
    }
    /// New `Self` from the given label key value, across all namespaces.
    pub fn label(key: &str, val: &str) -> Self {
        Self {
            label_selector: format!("{key}={val}"),
            namespace: None,
        }
    }
    /// Modify and return `Self` with the given namespace.
    /// An empty namespace means all namespaces.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Self::non_empty(namespace.into());
        self
    }
    /// The label selector.
    pub fn label_selector(&self) -> &str {
        &self.label_selector
    }
    /// The namespace, or None for all namespaces.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
    /// Human readable scope of the selector, used in messages.
    pub(crate) fn scope(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("namespace '{namespace}'"),
            None => "all namespaces".to_string(),
        }
    }
    fn non_empty(namespace: String) -> Option<String> {
        Some(namespace).filter(|namespace| !namespace.is_empty())
    }
}

/// Identify a port explicitly by its number or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Port {
    /// Specified using a number.
    Number(i32),
    /// Specified using a name.
    Name(String),
}
impl From<i32> for Port {
    fn from(port: i32) -> Self {
        Self::Number(port)
    }
}
impl From<&str> for Port {
    fn from(port: &str) -> Self {
        Self::Name(port.to_string())
    }
}
impl From<IntOrString> for Port {
    fn from(port: IntOrString) -> Self {
        match port {
            IntOrString::Int(port) => Self::Number(port),
            IntOrString::String(port) => Self::Name(port),
        }
    }
}
impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Port::Number(number) => write!(f, "{number}"),
            Port::Name(name) => write!(f, "{name}"),
        }
    }
}
