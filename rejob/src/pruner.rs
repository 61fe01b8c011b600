//! Periodic clean up of expired idempotency markers and old acknowledgements.
//!
//! Markers are released by the runner on every exit path, so only markers left behind by workers
//! that died mid execution expire. Those no longer block anything, but they accumulate in a
//! persistent store, as do the records of acknowledged messages. The pruner deletes expired
//! markers, and optionally acknowledgements older than a retention, on a [`cron::Schedule`].
//!
//! # Example
//!
//! ```
//! # use std::str::FromStr;
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! use chrono::TimeDelta;
//! use rejob::{guard::memory::InMemoryGuard, queue::memory::InMemoryQueue, Rejob};
//!
//! let schedule = cron::Schedule::from_str("0 */10 * * * *").unwrap();
//!
//! let rejob = Rejob::new(InMemoryQueue::new(), InMemoryGuard::new())
//!     .with_pruner(schedule, TimeDelta::days(7));
//!
//! rejob.graceful_shutdown().await.unwrap();
//! # });
//! ```
use std::{ops::Sub, time::Duration};

use chrono::{TimeDelta, Utc};
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{guard::IdempotencyGuard, queue::Queue};

pub(crate) struct Pruner<Q, G> {
    queue: Q,
    guard: G,
    schedule: Schedule,
    /// Acknowledgements are kept forever when `None`.
    retention: Option<TimeDelta>,
}

impl<Q, G> Pruner<Q, G>
where
    Q: Queue,
    G: IdempotencyGuard,
{
    pub(crate) fn new(queue: Q, guard: G, schedule: Schedule) -> Self {
        Self {
            queue,
            guard,
            schedule,
            retention: None,
        }
    }

    pub(crate) fn with_retention(self, retention: TimeDelta) -> Self {
        Self {
            retention: Some(retention),
            ..self
        }
    }

    pub(crate) fn spawn(self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let Some(next) = self.schedule.upcoming(Utc).next() else {
                    tracing::warn!("No future scheduled time for the pruner");
                    break;
                };
                let delay = next
                    .sub(Utc::now())
                    .sub(TimeDelta::milliseconds(10))
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        self.prune().await;
                        if let Ok(delay) = (next - Utc::now()).to_std() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    _ = cancellation_token.cancelled() => {
                        tracing::debug!("Shutting down the pruner");
                        break;
                    },
                }
            }
        })
    }

    async fn prune(&self) {
        match self.guard.prune_expired().await {
            Ok(0) => {}
            Ok(count) => tracing::debug!(count, "Pruned {count} expired idempotency markers"),
            Err(err) => {
                tracing::error!(?err, "Failed to prune idempotency markers with error {err}")
            }
        }
        let Some(retention) = self.retention else {
            return;
        };
        match self.queue.prune_acknowledged(retention).await {
            Ok(0) => {}
            Ok(count) => tracing::debug!(count, "Pruned {count} acknowledged messages"),
            Err(err) => {
                tracing::error!(?err, "Failed to prune acknowledged messages with error {err}")
            }
        }
    }
}
