//! Mapping of OS signals onto worker shutdown.

use std::sync::Arc;

use tokio::signal;

use crate::error::WorkerError;
use crate::worker::ActionWorker;

/// Run `worker` until it fails or Ctrl+C / SIGTERM arrives, then stop it.
///
/// With `exit_on_stop` set the process exits afterwards: 0 after a clean stop,
/// 1 after a fatal worker error.
pub async fn run_until_signal(worker: Arc<ActionWorker>) -> Result<(), WorkerError> {
    let result = tokio::select! {
        result = worker.start() => result,
        _ = shutdown_signal() => {
            worker.stop().await;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(worker = %worker.name(), error = %e, "Worker terminated");
    }

    if worker.options().exit_on_stop {
        std::process::exit(if result.is_ok() { 0 } else { 1 });
    }
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
