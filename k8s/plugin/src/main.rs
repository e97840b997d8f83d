use anyhow::Context;
use clap::Parser;
use kube_portforward::PortForwardSession;
use kubectl_tunnel::{shutdown, CliArgs};
use utils::tracing_telemetry::TracingTelemetry;

#[tokio::main]
async fn main() {
    let cli_args = CliArgs::parse();
    TracingTelemetry::builder()
        .with_style(cli_args.fmt_style)
        .with_verbosity(cli_args.verbose)
        .init();

    if let Err(error) = execute(cli_args).await {
        eprintln!("Failed to set up the port forward. Error {error:#}");
        std::process::exit(1);
    }
}

async fn execute(cli_args: CliArgs) -> anyhow::Result<()> {
    let mut session = PortForwardSession::setup(
        &cli_args.descriptor(),
        &cli_args.target(),
        cli_args.session_config(),
    )
    .await?;

    // the port is the output, consumed by whoever started us
    println!("{}", session.local_port_str());

    tokio::select! {
        signal = shutdown::wait_sig() => {
            signal.context("Failed to register the signal handlers")?;
            session.stop().await.context("Failed to stop the port forward")?;
        }
        result = session.wait() => {
            result.context("Port forward terminated")?;
        }
    }
    Ok(())
}
