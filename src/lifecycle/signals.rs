//! OS signal handling.
//!
//! # Design Decisions
//! - SIGTERM is the only trigger on Unix; SIGINT keeps its default behavior
//! - Non-Unix targets use Ctrl-C as the polite termination request
//! - A handler that cannot be installed never resolves, so the server
//!   keeps running instead of shutting down spuriously

use std::future;

/// Resolve when the process is asked to terminate.
pub async fn terminate() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("SIGTERM received, shutting down gracefully");
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Ctrl-C received, shutting down gracefully"),
            Err(err) => {
                tracing::error!(error = %err, "Failed to install Ctrl-C handler");
                future::pending::<()>().await;
            }
        }
    }
}
