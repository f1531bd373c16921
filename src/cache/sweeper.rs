//! Background eviction task
//!
//! Runs [`CacheStore::evict_expired`] on a fixed interval until stopped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::CacheStore;

/// Handle to the running eviction task
pub struct Sweeper {
    /// Signals the task to exit
    stop_tx: oneshot::Sender<()>,
    /// Background task running the sweep loop
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Start sweeping `store` every `interval`, removing entries older than `max_age`
    ///
    /// The first sweep runs immediately.
    pub fn start(store: Arc<CacheStore>, max_age: Duration, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let report = store.evict_expired(max_age).await;
                        if report.removed > 0 || report.failed > 0 {
                            info!(
                                removed = report.removed,
                                failed = report.failed,
                                "Cache sweep finished"
                            );
                        } else {
                            debug!("Cache sweep found nothing to evict");
                        }
                    }
                }
            }

            debug!("Cache sweeper stopped");
        });

        info!(
            max_age_secs = max_age.as_secs(),
            interval_secs = interval.as_secs(),
            "Cache sweeper started"
        );

        Self { stop_tx, task }
    }

    /// Stop the task and wait for an in-progress sweep to finish
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Cache sweeper task failed");
        }
    }
}
