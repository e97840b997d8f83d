use crate::{
    error::{
        AmbiguousPodsSnafu, Error, InvalidPortSnafu, NoPodsSnafu, NoServicePortSnafu,
        NoServiceSnafu, PodListSnafu, PodPortNotFoundSnafu, ServiceListSnafu,
    },
    vx::{Pod, Service, ServicePort},
    Port, Selector,
};
use kube::{
    api::{Api, ListParams},
    Client, ResourceExt,
};
use snafu::{ensure, OptionExt, ResultExt};
use std::str::FromStr;

/// Listing of the cluster resources needed to resolve a target.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// List the pods matching the label selector in the namespace, or in all namespaces.
    async fn list_pods(&self, namespace: Option<&str>, selector: &str) -> Result<Vec<Pod>, Error>;
    /// List the services matching the label selector in the namespace.
    async fn list_services(&self, namespace: &str, selector: &str)
        -> Result<Vec<Service>, Error>;
}

/// `ClusterApi` backed by the kube-api server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}
impl KubeCluster {
    /// Return a new `Self` using the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
    fn params(selector: &str) -> ListParams {
        ListParams::default().labels(selector)
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeCluster {
    async fn list_pods(&self, namespace: Option<&str>, selector: &str) -> Result<Vec<Pod>, Error> {
        let pod_api: Api<Pod> = match namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        };
        let pods = pod_api
            .list(&Self::params(selector))
            .await
            .context(PodListSnafu { selector })?;
        Ok(pods.items)
    }

    async fn list_services(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Service>, Error> {
        let svc_api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let services = svc_api
            .list(&Self::params(selector))
            .await
            .context(ServiceListSnafu {
                selector,
                namespace,
            })?;
        Ok(services.items)
    }
}

/// Which of the service's declared ports provides the target port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ServicePortSelection {
    /// The last declared port.
    #[default]
    Last,
    /// The first declared port.
    First,
    /// The port with the given name.
    Name(String),
    /// The port with the given service port number.
    Number(i32),
}
impl ServicePortSelection {
    const NAME_PREFIX: &'static str = "name:";

    fn select<'a>(&self, ports: &'a [ServicePort]) -> Option<&'a ServicePort> {
        match self {
            Self::Last => ports.last(),
            Self::First => ports.first(),
            Self::Name(name) => ports.iter().find(|p| p.name.as_ref() == Some(name)),
            Self::Number(number) => ports.iter().find(|p| p.port == *number),
        }
    }
}
impl FromStr for ServicePortSelection {
    type Err = std::convert::Infallible;

    /// `last`, `first`, a port number, or a port name.
    /// A `name:` prefix always selects by name.
    fn from_str(source: &str) -> Result<Self, Self::Err> {
        if let Some(name) = source.strip_prefix(Self::NAME_PREFIX) {
            return Ok(Self::Name(name.to_string()));
        }
        Ok(match source {
            "last" => Self::Last,
            "first" => Self::First,
            other => match other.parse::<i32>() {
                Ok(number) => Self::Number(number),
                Err(_) => Self::Name(other.to_string()),
            },
        })
    }
}
impl std::fmt::Display for ServicePortSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Last => write!(f, "last"),
            Self::First => write!(f, "first"),
            Self::Name(name) => write!(f, "name '{name}'"),
            Self::Number(number) => write!(f, "number {number}"),
        }
    }
}

/// The pod and port a session forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pod_name: String,
    pod_namespace: String,
    target_port: Port,
    pod_port: u16,
}
impl ResolvedTarget {
    /// Returns a new `Self` from the given parameters.
    pub fn new(
        pod_name: impl Into<String>,
        pod_namespace: impl Into<String>,
        target_port: impl Into<Port>,
        pod_port: u16,
    ) -> Self {
        Self {
            pod_name: pod_name.into(),
            pod_namespace: pod_namespace.into(),
            target_port: target_port.into(),
            pod_port,
        }
    }
    /// Name of the pod.
    pub fn pod_name(&self) -> &str {
        &self.pod_name
    }
    /// Namespace of the pod.
    pub fn pod_namespace(&self) -> &str {
        &self.pod_namespace
    }
    /// The target port as declared by the service.
    pub fn target_port(&self) -> &Port {
        &self.target_port
    }
    /// The container port number the target port maps to.
    pub fn pod_port(&self) -> u16 {
        self.pod_port
    }
}

/// Resolves a `Selector` into the single pod and port to forward to.
pub struct Resolver<C> {
    cluster: C,
    port_selection: ServicePortSelection,
}

impl<C: ClusterApi> Resolver<C> {
    /// Return a new `Self` querying the given cluster.
    pub fn new(cluster: C) -> Self {
        Self {
            cluster,
            port_selection: ServicePortSelection::default(),
        }
    }
    /// Move self with the following service port selection.
    pub fn with_port_selection(mut self, port_selection: ServicePortSelection) -> Self {
        self.port_selection = port_selection;
        self
    }

    /// Finds the pod matching the selector and the target port of its service.
    /// Exactly one pod must match, more than one means the workload is installed more than
    /// once and the namespace must be narrowed down.
    pub async fn resolve(&self, selector: &Selector) -> Result<ResolvedTarget, Error> {
        let label_selector = selector.label_selector();

        let pods = self
            .cluster
            .list_pods(selector.namespace(), label_selector)
            .await?;
        let pod = single_pod(pods, selector)?;
        let pod_name = pod.name_any();
        let pod_namespace = pod
            .namespace()
            .or_else(|| selector.namespace().map(ToString::to_string))
            .unwrap_or_else(|| "default".to_string());

        let services = self
            .cluster
            .list_services(&pod_namespace, label_selector)
            .await?;
        let service = services.into_iter().next().context(NoServiceSnafu {
            selector: label_selector,
            namespace: &pod_namespace,
        })?;
        let service_name = service.name_any();
        let ports = service
            .spec
            .and_then(|spec| spec.ports)
            .unwrap_or_default();
        let service_port = self
            .port_selection
            .select(&ports)
            .context(NoServicePortSnafu {
                service: &service_name,
                selection: self.port_selection.to_string(),
            })?;

        // an unset target port defaults to the service port
        let target_port = service_port
            .target_port
            .clone()
            .map(Port::from)
            .unwrap_or(Port::Number(service_port.port));
        let pod_port = container_port(&pod, &target_port)?;

        tracing::debug!(
            %pod_name,
            %pod_namespace,
            service = %service_name,
            %target_port,
            pod_port,
            "Resolved port forward target"
        );
        Ok(ResolvedTarget {
            pod_name,
            pod_namespace,
            target_port,
            pod_port,
        })
    }
}

fn single_pod(mut pods: Vec<Pod>, selector: &Selector) -> Result<Pod, Error> {
    ensure!(
        pods.len() <= 1,
        AmbiguousPodsSnafu {
            count: pods.len(),
            selector: selector.label_selector(),
            namespaces: pods
                .iter()
                .map(|p| p.namespace().unwrap_or_default())
                .collect::<Vec<_>>(),
        }
    );
    pods.pop().context(NoPodsSnafu {
        selector: selector.label_selector(),
        namespace: selector.scope(),
    })
}

/// The container port number of the pod for the given port.
/// Named ports are looked up in the pod's container ports.
fn container_port(pod: &Pod, port: &Port) -> Result<u16, Error> {
    let number = match port {
        Port::Number(number) => *number,
        Port::Name(name) => {
            let containers = pod.spec.iter().flat_map(|spec| spec.containers.iter());
            let mut ports = containers.filter_map(|c| c.ports.as_ref()).flatten();
            ports
                .find(|p| p.name.as_ref() == Some(name))
                .context(PodPortNotFoundSnafu {
                    pod: pod.name_any(),
                    port: name,
                })?
                .container_port
        }
    };
    u16::try_from(number)
        .ok()
        .filter(|port| *port != 0)
        .context(InvalidPortSnafu { port: number })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// A cluster returning canned pods and services.
    #[derive(Default, Clone)]
    pub(crate) struct FakeCluster {
        pods: Vec<Pod>,
        services: Vec<Service>,
        forbid_pods: bool,
        forbid_services: bool,
        pub(crate) service_lists: Arc<AtomicUsize>,
    }
    impl FakeCluster {
        pub(crate) fn forbid_pods(mut self) -> Self {
            self.forbid_pods = true;
            self
        }
        pub(crate) fn forbid_services(mut self) -> Self {
            self.forbid_services = true;
            self
        }
        pub(crate) fn with_pod(mut self, pod: Pod) -> Self {
            self.pods.push(pod);
            self
        }
        pub(crate) fn with_service(mut self, service: Service) -> Self {
            self.services.push(service);
            self
        }
    }

    #[async_trait::async_trait]
    impl ClusterApi for FakeCluster {
        async fn list_pods(
            &self,
            namespace: Option<&str>,
            selector: &str,
        ) -> Result<Vec<Pod>, Error> {
            if self.forbid_pods {
                return Err(forbidden("pods")).context(PodListSnafu { selector });
            }
            Ok(self
                .pods
                .iter()
                .filter(|p| namespace.is_none() || p.namespace().as_deref() == namespace)
                .cloned()
                .collect())
        }
        async fn list_services(
            &self,
            namespace: &str,
            selector: &str,
        ) -> Result<Vec<Service>, Error> {
            self.service_lists.fetch_add(1, Ordering::SeqCst);
            if self.forbid_services {
                return Err(forbidden("services")).context(ServiceListSnafu {
                    selector,
                    namespace,
                });
            }
            Ok(self
                .services
                .iter()
                .filter(|s| s.namespace().as_deref() == Some(namespace))
                .cloned()
                .collect())
        }
    }

    fn forbidden(resource: &str) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{resource} is forbidden"),
            reason: "Forbidden".to_string(),
            code: 403,
        })
    }

    pub(crate) fn pod(name: &str, namespace: &str) -> Pod {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name, "namespace": namespace, "labels": { "app": "ctrl" } },
            "spec": {
                "containers": [{
                    "name": "ctrl",
                    "image": "ctrl",
                    "ports": [
                        { "name": "http", "containerPort": 8888 },
                        { "name": "metrics", "containerPort": 9090 }
                    ],
                }],
            }
        }))
        .unwrap()
    }

    pub(crate) fn service(name: &str, namespace: &str, ports: serde_json::Value) -> Service {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": name, "namespace": namespace, "labels": { "app": "ctrl" } },
            "spec": { "ports": ports }
        }))
        .unwrap()
    }

    fn selector() -> Selector {
        Selector::all_namespaces("app=ctrl")
    }

    #[tokio::test]
    async fn no_pods() {
        let resolver = Resolver::new(FakeCluster::default());
        let error = resolver.resolve(&selector()).await.unwrap_err();
        assert!(matches!(error, Error::NoPods { .. }), "{error}");
        assert!(error.is_resolution());
    }

    #[tokio::test]
    async fn pod_list_failure() {
        let cluster = FakeCluster::default()
            .with_pod(pod("ctrl-1", "ns1"))
            .forbid_pods();
        let lists = cluster.service_lists.clone();

        let error = Resolver::new(cluster)
            .resolve(&selector())
            .await
            .unwrap_err();
        assert!(
            matches!(&error, Error::PodList { selector, .. } if selector == "app=ctrl"),
            "{error}"
        );
        assert!(error.is_resolution());
        assert_eq!(lists.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn service_list_failure() {
        let cluster = FakeCluster::default()
            .with_pod(pod("ctrl-1", "ns1"))
            .with_service(service("ctrl", "ns1", json!([{ "port": 80 }])))
            .forbid_services();

        let error = Resolver::new(cluster)
            .resolve(&selector())
            .await
            .unwrap_err();
        assert!(
            matches!(&error, Error::ServiceList { namespace, .. } if namespace == "ns1"),
            "{error}"
        );
        assert!(error.to_string().contains("forbidden"), "{error}");
    }

    #[tokio::test]
    async fn ambiguous_pods() {
        let cluster = FakeCluster::default()
            .with_pod(pod("ctrl-1", "ns1"))
            .with_pod(pod("ctrl-2", "ns2"));
        let lists = cluster.service_lists.clone();

        let error = Resolver::new(cluster)
            .resolve(&selector())
            .await
            .unwrap_err();
        match &error {
            Error::AmbiguousPods {
                count, namespaces, ..
            } => {
                assert_eq!(*count, 2);
                assert_eq!(namespaces, &vec!["ns1".to_string(), "ns2".to_string()]);
            }
            _ => panic!("unexpected error: {error}"),
        }
        assert!(error.to_string().ends_with("ns1 ns2"), "{error}");
        assert_eq!(lists.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn namespace_disambiguates() {
        let cluster = FakeCluster::default()
            .with_pod(pod("ctrl-1", "ns1"))
            .with_pod(pod("ctrl-2", "ns2"))
            .with_service(service("ctrl", "ns2", json!([{ "port": 80, "targetPort": 8888 }])));

        let target = Resolver::new(cluster)
            .resolve(&selector().with_namespace("ns2"))
            .await
            .unwrap();
        assert_eq!(target.pod_name(), "ctrl-2");
        assert_eq!(target.pod_namespace(), "ns2");
    }

    #[tokio::test]
    async fn no_service() {
        let cluster = FakeCluster::default()
            .with_pod(pod("ctrl-1", "ns1"))
            .with_service(service("ctrl", "other", json!([{ "port": 80 }])));
        let error = Resolver::new(cluster)
            .resolve(&selector())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NoService { .. }), "{error}");
    }

    #[tokio::test]
    async fn service_target_port() {
        let cluster = FakeCluster::default()
            .with_pod(pod("ctrl-1", "ns1"))
            .with_service(service("ctrl", "ns1", json!([{ "port": 80, "targetPort": 8080 }])));

        let target = Resolver::new(cluster)
            .resolve(&selector())
            .await
            .unwrap();
        assert_eq!(target, ResolvedTarget::new("ctrl-1", "ns1", 8080, 8080));
        assert_eq!(target.target_port().to_string(), "8080");
    }

    #[tokio::test]
    async fn named_target_port() {
        let cluster = FakeCluster::default()
            .with_pod(pod("ctrl-1", "ns1"))
            .with_service(service("ctrl", "ns1", json!([{ "port": 80, "targetPort": "metrics" }])));

        let target = Resolver::new(cluster)
            .resolve(&selector())
            .await
            .unwrap();
        assert_eq!(target.target_port(), &Port::Name("metrics".into()));
        assert_eq!(target.pod_port(), 9090);
    }

    #[tokio::test]
    async fn unknown_named_target_port() {
        let cluster = FakeCluster::default()
            .with_pod(pod("ctrl-1", "ns1"))
            .with_service(service("ctrl", "ns1", json!([{ "port": 80, "targetPort": "grpc" }])));

        let error = Resolver::new(cluster)
            .resolve(&selector())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::PodPortNotFound { .. }), "{error}");
    }

    #[tokio::test]
    async fn missing_target_port_defaults_to_port() {
        let cluster = FakeCluster::default()
            .with_pod(pod("ctrl-1", "ns1"))
            .with_service(service("ctrl", "ns1", json!([{ "port": 8888 }])));

        let target = Resolver::new(cluster)
            .resolve(&selector())
            .await
            .unwrap();
        assert_eq!(target.target_port(), &Port::Number(8888));
    }

    #[tokio::test]
    async fn port_selection() {
        let cluster = FakeCluster::default()
            .with_pod(pod("ctrl-1", "ns1"))
            .with_service(service(
                "ctrl",
                "ns1",
                json!([
                    { "name": "web", "port": 80, "targetPort": "http" },
                    { "name": "prom", "port": 81, "targetPort": "metrics" }
                ]),
            ));

        let cases = [
            (ServicePortSelection::Last, 9090),
            (ServicePortSelection::First, 8888),
            (ServicePortSelection::Name("web".into()), 8888),
            (ServicePortSelection::Number(81), 9090),
        ];
        for (selection, pod_port) in cases {
            let target = Resolver::new(cluster.clone())
                .with_port_selection(selection.clone())
                .resolve(&selector())
                .await
                .unwrap();
            assert_eq!(target.pod_port(), pod_port, "{selection}");
        }

        let error = Resolver::new(cluster)
            .with_port_selection(ServicePortSelection::Name("grpc".into()))
            .resolve(&selector())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NoServicePort { .. }), "{error}");
    }

    #[test]
    fn port_selection_from_str() {
        let parse = |s: &str| ServicePortSelection::from_str(s).unwrap();
        assert_eq!(parse("last"), ServicePortSelection::Last);
        assert_eq!(parse("first"), ServicePortSelection::First);
        assert_eq!(parse("8080"), ServicePortSelection::Number(8080));
        assert_eq!(parse("http"), ServicePortSelection::Name("http".into()));
        assert_eq!(parse("name:last"), ServicePortSelection::Name("last".into()));
        assert_eq!(parse("name:first"), ServicePortSelection::Name("first".into()));
        assert_eq!(parse("name:8080"), ServicePortSelection::Name("8080".into()));
    }

    #[tokio::test]
    async fn port_named_like_a_keyword() {
        let cluster = FakeCluster::default()
            .with_pod(pod("ctrl-1", "ns1"))
            .with_service(service(
                "ctrl",
                "ns1",
                json!([
                    { "name": "last", "port": 80, "targetPort": "http" },
                    { "name": "prom", "port": 81, "targetPort": "metrics" }
                ]),
            ));

        let target = Resolver::new(cluster)
            .with_port_selection(ServicePortSelection::from_str("name:last").unwrap())
            .resolve(&selector())
            .await
            .unwrap();
        assert_eq!(target.pod_port(), 8888);
    }
}
