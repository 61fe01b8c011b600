//! Dependency aware job execution.
//!
//! `rejob` runs units of deferred work, [`job::Job`]s, pulled from a [`queue::Queue`]. Every
//! delivery goes through the same wrapper which validates the arguments, prevents concurrent
//! duplicate execution via an [`guard::IdempotencyGuard`], classifies the [`outcome::Outcome`],
//! and requeues recoverable failures with backoff. A job waiting on work done by another job
//! reports a recoverable outcome instead of blocking a worker, see [`dependency`].
//!
//! # Example
//!
//! ```
//! # use rejob::prelude::*;
//! use rejob::{guard::memory::InMemoryGuard, queue::memory::InMemoryQueue};
//!
//! struct SeoUpdate;
//!
//! #[async_trait::async_trait]
//! impl Job for SeoUpdate {
//!     const NAME: &'static str = "seo-update";
//!     const REQUIRED_ARGUMENTS: &'static [Required] =
//!         &[Required::key(SUBJECT_ID), Required::key("title")];
//!
//!     async fn execute(&self, _arguments: &JobArguments) -> Outcome {
//!         Outcome::Success
//!     }
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let queue = InMemoryQueue::new();
//! let rejob = Rejob::new(queue.clone(), InMemoryGuard::new()).with_job(SeoUpdate);
//!
//! SeoUpdate::builder()
//!     .with_subject("X")
//!     .with_argument("title", "Widget")
//!     .enqueue(&queue)
//!     .await
//!     .unwrap();
//!
//! rejob.graceful_shutdown().await.unwrap();
//! # });
//! ```
use std::sync::Arc;

pub mod backoff;
pub mod cache;
pub mod dependency;
pub mod guard;
pub mod job;
pub mod outcome;
pub mod prelude;
mod pruner;
pub mod queue;
pub mod scheduler;
pub mod testing;

use cache::{CacheInvalidator, SharedInvalidator};
use futures::StreamExt;
use guard::IdempotencyGuard;
use job::{runner::JobRunner, Job, JobType};
use chrono::TimeDelta;
use pruner::Pruner;
use queue::{Queue, QueueError};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// The worker runtime.
///
/// Spawns [`Job::CONCURRENCY`] worker loops per registered job, each subscribed to the queue for
/// the job's type, and an optional pruner for expired idempotency markers.
pub struct Rejob<Q, G> {
    queue: Q,
    guard: G,
    invalidator: SharedInvalidator,
    workers: Vec<WorkerHandle>,
    cancellation_token: CancellationToken,
    pruner: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct WorkerHandle {
    job_type: JobType,
    sender: mpsc::UnboundedSender<Message>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    async fn graceful_shutdown(&mut self) -> Result<(), RejobError> {
        tracing::debug!(job_type = %self.job_type, "Stopping worker for {}", self.job_type);
        self.sender
            .send(Message::Terminate)
            .map_err(|_| RejobError::GracefulShutdownFailed)?;
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|_| RejobError::GracefulShutdownFailed)?;
        }
        Ok(())
    }
}

enum Message {
    Terminate,
}

impl<Q, G> Rejob<Q, G>
where
    Q: Queue,
    G: IdempotencyGuard,
{
    pub fn new(queue: Q, guard: G) -> Self {
        Self {
            queue,
            guard,
            invalidator: SharedInvalidator::default(),
            workers: Default::default(),
            cancellation_token: Default::default(),
            pruner: None,
        }
    }

    /// Invalidate caches after every successful job, including jobs registered before this call.
    pub fn with_cache_invalidator(self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidator.set(invalidator);
        self
    }

    /// Start consuming deliveries of `J`.
    pub fn with_job<J: Job>(mut self, job: J) -> Self {
        let runner = JobRunner::new(Arc::new(job), self.queue.clone(), self.guard.clone())
            .with_cache_invalidator(Arc::new(self.invalidator.clone()));

        for _ in 0..J::CONCURRENCY.max(1) {
            let (sender, mut rx) = mpsc::unbounded_channel();

            let handle = tokio::spawn({
                let queue = self.queue.clone();
                let runner = runner.clone();
                async move {
                    let mut stream = queue.subscribe(J::job_type()).await;
                    loop {
                        tokio::select! {
                            delivery = stream.next() => {
                                match delivery {
                                    Some(Ok(delivery)) => {
                                        runner.execute_job(delivery).await;
                                    }
                                    Some(Err(error)) => {
                                        tracing::error!(?error, "Failed to receive job {}: {error}", J::NAME)
                                    }
                                    None => {
                                        tracing::warn!("Delivery stream for {} closed", J::NAME);
                                        break;
                                    }
                                }
                            },
                            _ = rx.recv() => {
                                break;
                            }
                        }
                    }
                    tracing::debug!("Shutting down rejob worker for {}", J::NAME);
                }
            });

            self.workers.push(WorkerHandle {
                job_type: J::job_type(),
                sender,
                handle: Some(handle),
            });
        }
        self
    }

    /// Periodically delete expired idempotency markers on the given schedule.
    pub fn with_marker_pruner(self, schedule: cron::Schedule) -> Self {
        let pruner = Pruner::new(self.queue.clone(), self.guard.clone(), schedule);
        self.spawn_pruner(pruner)
    }

    /// Periodically delete expired idempotency markers, and acknowledged messages older than
    /// `retention`, on the given schedule.
    pub fn with_pruner(self, schedule: cron::Schedule, retention: TimeDelta) -> Self {
        let pruner = Pruner::new(self.queue.clone(), self.guard.clone(), schedule)
            .with_retention(retention);
        self.spawn_pruner(pruner)
    }

    fn spawn_pruner(mut self, pruner: Pruner<Q, G>) -> Self {
        if let Some(previous) = self.pruner.replace(pruner.spawn(self.cancellation_token.clone())) {
            previous.abort();
        }
        self
    }

    /// Stop every worker once its current delivery has been acknowledged.
    pub async fn graceful_shutdown(mut self) -> Result<(), RejobError> {
        tracing::debug!("Shutting down Rejob tasks");
        self.cancellation_token.cancel();
        if let Some(pruner) = self.pruner.take() {
            pruner
                .await
                .map_err(|_| RejobError::GracefulShutdownFailed)?;
        }
        futures::future::join_all(
            self.workers
                .iter_mut()
                .map(WorkerHandle::graceful_shutdown),
        )
        .await
        .into_iter()
        .collect()
    }
}

#[derive(Debug, Error)]
pub enum RejobError {
    #[error("Failed to gracefully shut down")]
    GracefulShutdownFailed,
    #[error("Error communicating with the queue")]
    Queue(#[from] QueueError),
}
