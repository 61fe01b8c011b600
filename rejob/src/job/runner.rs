//! The execution wrapper every delivery goes through.
//!
//! ```text
//! delivery -> validate -> invalid ------------------------------------> Dropped
//!                      -> acquire guard -> held by another instance --> Skipped / Deferred
//!                                       -> execute -> success --------> Completed
//!                                                  -> recoverable ----> Requeued / Abandoned
//!                                                  -> fatal, panic,
//!                                                     timeout --------> Dropped
//! ```
//!
//! Whatever the job does, the runner answers the delivery with exactly one [`Ack`] and never
//! propagates a failure to its caller.
use std::{sync::Arc, time::Duration};

use tokio::task::JoinError;
use tracing::{instrument, Instrument};

use super::{
    arguments::JobArguments,
    validation::validate,
    Job, JobType,
};
use crate::{
    cache::CacheInvalidator,
    guard::{IdempotencyGuard, IdempotencyKey, OnDuplicate},
    outcome::{Ack, Outcome},
    queue::{scheduled_in, Delivery, EnqueuedJob, Queue},
    scheduler::{BackoffScheduler, Decision},
};

const ERROR_TYPE_PANIC: &str = "panic";
const ERROR_TYPE_TIMEOUT: &str = "timeout";

/// Runs deliveries of the job `J`.
pub struct JobRunner<Q, G, J> {
    job: Arc<J>,
    queue: Q,
    guard: G,
    scheduler: BackoffScheduler<Q>,
    invalidator: Option<Arc<dyn CacheInvalidator>>,
}

impl<Q, G, J> Clone for JobRunner<Q, G, J>
where
    Q: Clone,
    G: Clone,
{
    fn clone(&self) -> Self {
        Self {
            job: self.job.clone(),
            queue: self.queue.clone(),
            guard: self.guard.clone(),
            scheduler: self.scheduler.clone(),
            invalidator: self.invalidator.clone(),
        }
    }
}

impl<Q, G, J> JobRunner<Q, G, J>
where
    Q: Queue,
    G: IdempotencyGuard,
    J: Job,
{
    pub fn new(job: Arc<J>, queue: Q, guard: G) -> Self {
        Self {
            job,
            scheduler: BackoffScheduler::new(queue.clone()),
            queue,
            guard,
            invalidator: None,
        }
    }

    pub fn with_cache_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    /// Execute a single delivery and acknowledge it to the queue.
    #[instrument(
        skip(self, delivery),
        fields(job_type = J::NAME, delivery_id = %delivery.id, attempt = delivery.arguments.attempt())
    )]
    pub async fn execute_job(&self, delivery: Delivery) -> Ack {
        let delivery_id = delivery.id;
        let ack = self.process(&delivery.arguments).await;

        let _ = self
            .queue
            .acknowledge(delivery_id, ack)
            .await
            .inspect_err(|err| {
                tracing::error!(
                    ?err,
                    %delivery_id,
                    "Failed to acknowledge delivery {delivery_id} as {}, error: {err:?}",
                    ack.label(),
                )
            });

        ack
    }

    async fn process(&self, arguments: &JobArguments) -> Ack {
        let job_type = J::job_type();

        if validate(job_type, arguments, J::REQUIRED_ARGUMENTS).is_err() {
            return Ack::Dropped;
        }

        let key = J::idempotency_key(arguments);
        if let Some(key) = &key {
            match self.guard.try_acquire(key, J::IDEMPOTENCY_TTL).await {
                Ok(true) => {}
                Ok(false) => return self.handle_duplicate(key, arguments).await,
                Err(err) => {
                    tracing::error!(
                        ?err,
                        %key,
                        "Failed to acquire idempotency marker {key}, error: {err:?}",
                    );
                    let outcome =
                        Outcome::recoverable(format!("idempotency store unavailable: {err}"));
                    return self.handle_outcome(arguments, outcome).await;
                }
            }
        }

        let outcome = self.run(arguments).await;

        // The marker stays held until the cache is invalidated.
        if outcome == Outcome::Success {
            if let Some(subject_id) = arguments.subject_id() {
                self.invalidate_cache(job_type, &subject_id).await;
            }
        }

        if let Some(key) = &key {
            let _ = self.guard.release(key).await.inspect_err(|err| {
                tracing::error!(
                    ?err,
                    %key,
                    "Failed to release idempotency marker {key}, error: {err:?}",
                )
            });
        }

        self.handle_outcome(arguments, outcome).await
    }

    async fn run(&self, arguments: &JobArguments) -> Outcome {
        let job = self.job.clone();
        let owned = arguments.clone();
        let timeout = J::timeout(arguments);

        tracing::debug!("Executing job {}", J::NAME);

        let fut = async move {
            match timeout {
                Some(timeout) => tokio::time::timeout(timeout, job.execute(&owned))
                    .await
                    .map_err(|_elapsed| timeout),
                None => Ok(job.execute(&owned).await),
            }
        }
        .in_current_span();

        match tokio::spawn(fut).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(timeout)) => Outcome::fatal(timeout_reason(timeout)),
            Err(error) => Outcome::fatal(panic_reason(error)),
        }
    }

    async fn handle_outcome(&self, arguments: &JobArguments, outcome: Outcome) -> Ack {
        let job_type = J::job_type();
        let attempt = arguments.attempt();
        let subject_id = arguments.subject_id();
        let subject = subject_id.as_deref().unwrap_or_default();

        match outcome {
            Outcome::Success => {
                tracing::info!(
                    %job_type,
                    subject_id = subject,
                    attempt,
                    outcome = "success",
                    "Job {job_type} for subject {subject} completed",
                );
                Ack::Completed
            }
            Outcome::RecoverableFailure { reason, retry } => {
                let policy = retry.unwrap_or_else(J::retry_policy);
                match self
                    .scheduler
                    .requeue(job_type, arguments, &reason, policy)
                    .await
                {
                    Ok(Decision::Requeued { delay, attempt }) => Ack::Requeued { delay, attempt },
                    Ok(Decision::Abandon { attempts }) => Ack::Abandoned { attempts },
                    Err(err) => {
                        tracing::error!(
                            ?err,
                            %job_type,
                            subject_id = subject,
                            attempt,
                            outcome = "recoverable_failure",
                            %reason,
                            "Failed to requeue job {job_type} for subject {subject}, error: {err:?}",
                        );
                        Ack::Dropped
                    }
                }
            }
            Outcome::FatalFailure { reason } => {
                tracing::error!(
                    %job_type,
                    subject_id = subject,
                    attempt,
                    outcome = "fatal_failure",
                    %reason,
                    "Job {job_type} for subject {subject} failed and will be discarded: {reason}",
                );
                Ack::Dropped
            }
        }
    }

    async fn handle_duplicate(&self, key: &IdempotencyKey, arguments: &JobArguments) -> Ack {
        let job_type = J::job_type();
        let attempt = arguments.attempt();

        match J::ON_DUPLICATE {
            OnDuplicate::Skip => {
                tracing::info!(
                    %job_type,
                    %key,
                    attempt,
                    outcome = "skipped",
                    "Job {job_type} already executing for {key}, skipping",
                );
                Ack::Skipped
            }
            OnDuplicate::Defer(delay) => {
                let result = self
                    .queue
                    .enqueue(EnqueuedJob {
                        job_type,
                        arguments: arguments.clone(),
                        scheduled_at: scheduled_in(delay),
                    })
                    .await;
                match result {
                    Ok(_) => {
                        tracing::info!(
                            %job_type,
                            %key,
                            attempt,
                            outcome = "deferred",
                            "Job {job_type} already executing for {key}, deferring by {delay}",
                        );
                        Ack::Deferred { delay }
                    }
                    Err(err) => {
                        tracing::error!(
                            ?err,
                            %job_type,
                            %key,
                            "Failed to defer duplicate job {job_type} for {key}, error: {err:?}",
                        );
                        Ack::Dropped
                    }
                }
            }
        }
    }

    async fn invalidate_cache(&self, job_type: JobType, subject_id: &str) {
        if let Some(invalidator) = &self.invalidator {
            let _ = invalidator
                .invalidate(job_type, subject_id)
                .await
                .inspect_err(|err| {
                    tracing::error!(
                        ?err,
                        %job_type,
                        subject_id,
                        "Failed to invalidate cache for subject {subject_id}, error: {err:?}",
                    )
                });
        }
    }
}

fn panic_reason(error: JoinError) -> String {
    let msg = error.to_string();
    let message = match error.try_into_panic() {
        Ok(panic) => panic
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or(msg),
        Err(_) => msg,
    };
    format!("{ERROR_TYPE_PANIC}: {message}")
}

fn timeout_reason(timeout: Duration) -> String {
    format!("{ERROR_TYPE_TIMEOUT}: job failed to complete within {timeout:?}")
}
