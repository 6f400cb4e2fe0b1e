//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! A signal cancels the sync session's token; the engine notices it between
//! files, so the file being hashed or uploaded is finished first.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled once a shutdown signal arrives
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for shutdown signal (SIGTERM or SIGINT), then cancel the token
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
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
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), finishing current file before stopping...");
            }
            _ = terminate => {
                info!("Received SIGTERM, finishing current file before stopping...");
            }
            _ = self.token.cancelled() => return,
        }

        self.token.cancel();
    }

    /// Spawn the signal listener in the background
    pub fn listen(self) -> CancellationToken {
        let token = self.token();
        tokio::spawn(async move {
            self.wait_for_signal().await;
        });
        token
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_returns_when_cancelled_elsewhere() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();

        let handle = tokio::spawn(async move {
            coordinator.wait_for_signal().await;
        });

        token.cancel();

        // Task should complete
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }
}
