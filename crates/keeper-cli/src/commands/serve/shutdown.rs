use std::sync::Arc;
use std::time::Duration;

use keeper_database::DbConnection;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cancel `token` on Ctrl+C or SIGTERM.
pub async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
        _ = token.cancelled() => return,
    }
    token.cancel();
}

/// Let cancelled work record its final state, then close the database.
pub async fn cleanup(db: Arc<DbConnection>, timeout: Duration) {
    info!("Starting resource cleanup...");

    let cleanup = async {
        // Background tasks drop their handles as they observe cancellation
        let mut db = db;
        loop {
            match Arc::try_unwrap(db) {
                Ok(conn) => {
                    if let Err(e) = conn.close().await {
                        warn!("Error closing database connection: {}", e);
                    } else {
                        debug!("Database connection closed successfully");
                    }
                    return;
                }
                Err(shared) => {
                    db = shared;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    };

    match tokio::time::timeout(timeout, cleanup).await {
        Ok(()) => info!("Graceful shutdown completed"),
        Err(_) => warn!("Cleanup timeout exceeded ({:?}), forcing shutdown", timeout),
    }
}
