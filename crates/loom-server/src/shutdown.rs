//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use loom_runtime::JobScheduler;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Signals the HTTP listener to stop and drains the job workers.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, then wait up to `timeout` for workers to finish
    /// their current job. Jobs still running afterwards keep their
    /// `running` status.
    pub async fn drain(&self, scheduler: &JobScheduler, timeout: Duration) {
        self.shutdown();
        info!(timeout_secs = timeout.as_secs(), "draining job workers");
        if tokio::time::timeout(timeout, scheduler.shutdown()).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some jobs may still be running");
        }
    }
}
