//! Deferred execution: acknowledge now, finish the work on a detached task.
//!
//! Handlers call [`DeferredExecutor::defer`] after deciding their response;
//! the work runs on its own task and the caller never waits on it. On shutdown
//! the executor stops accepting work and drains what is in flight.

use std::future::Future;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct DeferredExecutor {
    tracker: TaskTracker,
}

impl DeferredExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` on a detached task labelled `label`.
    pub fn defer<F>(&self, label: &'static str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            warn!(task = label, "Deferred work submitted after shutdown began");
        }
        debug!(task = label, "Deferring work");
        self.tracker.spawn(work);
    }

    /// Number of deferred tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work and wait up to `timeout` for in-flight tasks.
    /// Returns `true` if everything finished.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending == 0 {
            return true;
        }
        info!(pending, "Waiting for deferred work to finish");
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("Deferred work drained");
                true
            }
            Err(_) => {
                warn!(remaining = self.tracker.len(), "Deferred work still running at shutdown deadline");
                false
            }
        }
    }
}
