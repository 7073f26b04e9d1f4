pub mod authority;
pub mod edge;
pub mod health;
pub mod relay;

use tokio::signal::unix::{SignalKind, signal};

/// Resolve on SIGTERM or SIGINT.
pub async fn shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown..."),
        _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown..."),
    }
    Ok(())
}
