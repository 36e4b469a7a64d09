use std::sync::Arc;
use std::time::Duration;

use tokio::signal;

use crate::server::AppState;

/// How long shutdown waits for running analyses before giving up on them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_POLL: Duration = Duration::from_millis(200);

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Perform graceful shutdown: give in-flight analyses a chance to finish.
pub async fn graceful_shutdown(state: &Arc<AppState>) {
    tracing::info!("Starting graceful shutdown...");

    let in_flight = state.results.in_flight().await;
    if in_flight.is_empty() {
        tracing::info!("No in-flight analyses");
        return;
    }

    tracing::info!(
        count = in_flight.len(),
        tickets = ?in_flight,
        "Waiting for in-flight analyses"
    );

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while !state.results.in_flight().await.is_empty() {
            tokio::time::sleep(DRAIN_POLL).await;
        }
    })
    .await;

    match drained {
        Ok(()) => tracing::info!("Graceful shutdown complete"),
        Err(_) => {
            let abandoned = state.results.in_flight().await;
            tracing::warn!(
                count = abandoned.len(),
                tickets = ?abandoned,
                "Shutdown timed out, abandoning in-flight analyses"
            );
        }
    }
}
