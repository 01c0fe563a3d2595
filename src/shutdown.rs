use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::distribution::{Distributor, SYSTEM_ACTOR};

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is received.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}

/// Wait for shutdown, then cancel every job still running so no target
/// log is left `Prepared`.
pub async fn cancel_on_shutdown(token: CancellationToken, distributor: Distributor) -> usize {
    token.cancelled().await;
    let cancelled = distributor.cancel_all(SYSTEM_ACTOR).await;
    if cancelled > 0 {
        tracing::info!(cancelled, "Cancelled running distributions on shutdown");
    }
    cancelled
}
