//! Waiting on the signals which end the port forward.

/// Returns the name of the signal which requested the shutdown: INT or TERM.
#[cfg(unix)]
pub async fn wait_sig() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;

    let kind = tokio::select! {
        _ = sig_int.recv() => "SIGINT",
        _ = sig_term.recv() => "SIGTERM",
    };
    tracing::warn!(signal = kind, "Signalled");
    Ok(kind)
}

/// Returns the name of the signal which requested the shutdown: ctrl-c.
#[cfg(not(unix))]
pub async fn wait_sig() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    tracing::warn!(signal = "ctrl-c", "Signalled");
    Ok("ctrl-c")
}
