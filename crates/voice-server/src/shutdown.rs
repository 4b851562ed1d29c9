//! Shutdown signal handling, grounded in the teacher's own
//! `registry_server` binary: Ctrl+C or SIGTERM trigger graceful shutdown.

use std::time::Duration;

use tracing::{error, info, warn};

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, draining in-flight calls..."),
        _ = terminate => info!("received SIGTERM, draining in-flight calls..."),
    }
}

/// Resolves once a shutdown signal arrives, same as [`shutdown_signal`], but
/// also arms a background timer that force-exits the process if in-flight
/// media sessions haven't closed within `drain_window` (SPEC_FULL §G.1).
/// `axum::serve(..).with_graceful_shutdown` otherwise waits indefinitely.
pub async fn shutdown_signal_with_drain(drain_window: Duration) {
    shutdown_signal().await;
    tokio::spawn(async move {
        tokio::time::sleep(drain_window).await;
        warn!(drain_window_secs = drain_window.as_secs(), "drain window elapsed, forcing exit");
        std::process::exit(1);
    });
}
