//! Deferred retry scheduling.
//!
//! Failed transient tasks are not re-attempted inline; this scheduler
//! periodically resets them to pending. The pass interval backs off
//! exponentially while there is nothing to retry and snaps back to the base
//! interval as soon as a pass makes progress, staying bounded either way.

use shared::queue::TaskQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Periodic retry pass driver
pub struct RetryScheduler {
    queue: Arc<TaskQueue>,
    base_interval: Duration,
    max_interval: Duration,
}

impl RetryScheduler {
    pub fn new(queue: Arc<TaskQueue>, base_interval: Duration, max_interval: Duration) -> Self {
        Self {
            queue,
            base_interval,
            max_interval,
        }
    }

    /// Run retry passes until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = self.base_interval;
        info!(
            base_secs = self.base_interval.as_secs(),
            max_secs = self.max_interval.as_secs(),
            "Retry scheduler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.queue.retry_failed() {
                Ok(0) => {
                    interval = (interval * 2).min(self.max_interval);
                    debug!(
                        next_pass_secs = interval.as_secs(),
                        "Nothing to retry, backing off"
                    );
                }
                Ok(count) => {
                    interval = self.base_interval;
                    info!(count, "Reset failed tasks to pending");
                }
                Err(e) => {
                    interval = (interval * 2).min(self.max_interval);
                    warn!(error = %e, "Retry pass failed");
                }
            }
        }

        info!("Retry scheduler stopped");
    }
}
