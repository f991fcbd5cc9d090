// src/server/main_loop.rs

//! Contains the main server loop that waits for a shutdown signal and then
//! stops every background task.

use super::context::ServerContext;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

/// How long background tasks get to finish after the shutdown signal.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Runs until SIGINT, SIGTERM, or the failure of a background task.
pub async fn run(mut ctx: ServerContext) {
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to register signal handlers: {}. Shutting down.", e);
            shutdown(ctx).await;
            return;
        }
    };

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }

            res = ctx.background_tasks.join_next() => {
                match res {
                    Some(Ok(Ok(()))) => warn!("A background task finished unexpectedly without an error."),
                    Some(Ok(Err(e))) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Some(Err(e)) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                    None => { warn!("No background tasks left. Shutting down."); break; }
                }
            },
        }
    }

    shutdown(ctx).await;
}

async fn shutdown(mut ctx: ServerContext) {
    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        warn!("No task was listening for the shutdown signal.");
    }

    let drain = async {
        while let Some(res) = ctx.background_tasks.join_next().await {
            if let Ok(Err(e)) = res {
                warn!("Background task reported an error during shutdown: {}", e);
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, drain).await.is_err() {
        warn!("Timed out waiting for background tasks. Aborting the rest.");
        ctx.background_tasks.abort_all();
    }
    info!("Shutdown complete.");
}
