//! Janitor - retention を過ぎた completed / archived レコードの削除

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::{loop_backoff, sleep_or_shutdown};
use crate::error::Result;
use crate::ports::Clock;
use crate::queue::QueueStore;

#[derive(Clone)]
pub struct Janitor {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl Janitor {
    pub fn new(store: Arc<dyn QueueStore>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval,
        }
    }

    /// Returns how many records were deleted.
    pub async fn sweep(&self) -> Result<usize> {
        let deleted = self.store.sweep_expired(self.clock.now()).await?;
        if deleted > 0 {
            tracing::debug!(deleted, "deleted expired tasks");
        }
        Ok(deleted)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let backoff = loop_backoff(self.interval);
        let mut failures: u32 = 0;

        loop {
            let wait = match self.sweep().await {
                Ok(_) => {
                    failures = 0;
                    self.interval
                }
                Err(e) => {
                    let wait = backoff.backoff(failures);
                    failures = failures.saturating_add(1);
                    tracing::warn!(error = %e, retry_in = ?wait, "janitor sweep failed");
                    wait
                }
            };
            if sleep_or_shutdown(wait, &mut shutdown).await {
                break;
            }
        }
        tracing::debug!("janitor stopped");
    }
}
