// Graceful shutdown handling.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
#[error("graceful shutdown timeout exceeded")]
pub struct TimeoutError;

/// Waits for a shutdown signal, then drains registered tasks under a
/// deadline. Tasks register with [`GracefulShutdown::add`] and report
/// completion with [`GracefulShutdown::done`].
#[derive(Clone)]
pub struct GracefulShutdown {
    shutdown_token: CancellationToken,
    timeout: Duration,
    counter: Arc<tokio::sync::Semaphore>,
}

impl GracefulShutdown {
    pub fn new(shutdown_token: CancellationToken, timeout: Duration) -> Self {
        Self {
            shutdown_token,
            timeout,
            counter: Arc::new(tokio::sync::Semaphore::new(0)),
        }
    }

    /// Registers `n` tasks to wait for.
    pub fn add(&self, n: usize) {
        self.counter.add_permits(n);
    }

    /// Marks one registered task as finished.
    pub fn done(&self) {
        let _ = self.counter.try_acquire();
    }

    /// Blocks until SIGINT or token cancellation, then waits for every
    /// registered task, bounded by the configured timeout.
    pub async fn await_shutdown(&self) -> Result<()> {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!(
                    component = "shutdown",
                    event = "os_signal",
                    signal = "SIGINT",
                    "shutdown started"
                );
            }
            _ = self.shutdown_token.cancelled() => {
                info!(
                    component = "shutdown",
                    event = "token_cancelled",
                    "shutdown started"
                );
            }
        }
        self.shutdown_token.cancel();

        match timeout(self.timeout, self.wait_for_completion()).await {
            Ok(_) => {
                info!(
                    component = "shutdown",
                    event = "shutdown_complete",
                    "service shut down cleanly"
                );
                Ok(())
            }
            Err(_) => {
                warn!(
                    component = "shutdown",
                    event = "shutdown_timeout",
                    timeout_secs = self.timeout.as_secs(),
                    "tasks did not finish within the shutdown timeout"
                );
                Err(TimeoutError.into())
            }
        }
    }

    async fn wait_for_completion(&self) {
        // Every permit added by add() is taken back by a done() call;
        // draining them all means every task finished.
        let registered = self.counter.available_permits();
        for _ in 0..registered {
            let _permit = self.counter.acquire().await;
        }
    }
}
