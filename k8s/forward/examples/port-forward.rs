#[tokio::main]
async fn main() -> Result<(), kube_portforward::Error> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()),
        )
        .init();

    let descriptor = kube_portforward::ConnectionDescriptor::default();
    let selector = kube_portforward::Selector::label("app", "ctrl").with_namespace("ns1");
    let config = kube_portforward::SessionConfig::default()
        .with_port_selection(kube_portforward::ServicePortSelection::First);

    let mut session =
        kube_portforward::PortForwardSession::setup(&descriptor, &selector, config).await?;
    tracing::info!(port = session.local_port(), "forwarding, hit ctrl-c to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => session.stop().await,
        result = session.wait() => result,
    }
}
