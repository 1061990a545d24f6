//! Graceful shutdown utilities

use std::future::Future;

use tracing::{info, warn};

/// What ended the wait in [`wait_for_shutdown_or`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Ctrl+C or SIGTERM
    Signal,
    /// The supplied future completed first (the service stopped itself)
    Internal,
}

/// Resolve on Ctrl+C (SIGINT) or, on Unix, SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(
                    "Failed to install SIGTERM handler: {}. Service will only respond to Ctrl+C",
                    e
                );
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(mut sig) = term_signal {
                    sig.recv().await;
                } else {
                    std::future::pending::<()>().await
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Wait for a shutdown signal or for `internal` to complete, whichever is first
///
/// # Example
///
/// ```ignore
/// let trigger = common::shutdown::wait_for_shutdown_or(plugin.wait_stopped()).await;
/// if trigger == ShutdownTrigger::Signal {
///     plugin.stop().await;
/// }
/// ```
pub async fn wait_for_shutdown_or<F>(internal: F) -> ShutdownTrigger
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            ShutdownTrigger::Signal
        },
        _ = internal => ShutdownTrigger::Internal,
    }
}
