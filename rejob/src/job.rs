//! The job contract.
//!
//! Every unit of deferred work implements [`Job`]. A job is a value, so the collaborators it needs
//! (API clients, persistence handles) are passed to its constructor and shared by every
//! execution.
use std::{fmt::Display, time::Duration};

use async_trait::async_trait;
use chrono::TimeDelta;

use crate::{
    backoff::BackoffStrategy,
    guard::{IdempotencyKey, OnDuplicate},
    outcome::Outcome,
    scheduler::RetryPolicy,
};

pub mod arguments;
pub mod builder;
pub mod runner;
pub mod validation;

use arguments::{JobArguments, SUBJECT_ID};
use builder::JobBuilder;
use validation::Required;

/// The default backoff strategy for jobs: linear growth of 10 seconds per attempt, capped at one
/// hour.
pub const DEFAULT_BACKOFF_STRATEGY: BackoffStrategy =
    BackoffStrategy::linear(TimeDelta::seconds(10)).with_max(TimeDelta::hours(1));

/// How long an idempotency marker is honoured if the worker holding it never releases it.
pub const DEFAULT_IDEMPOTENCY_TTL: TimeDelta = TimeDelta::seconds(600);

/// A stable identifier naming a class of work.
///
/// This is the name under which jobs are stored in the queue and under which idempotency markers
/// are written. It is declared explicitly via [`Job::NAME`] so renaming a rust type does not break
/// the integration with the queue or reset deduplication history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobType(&'static str);

impl JobType {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl From<&'static str> for JobType {
    fn from(value: &'static str) -> Self {
        Self(value)
    }
}

impl std::ops::Deref for JobType {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// A unit of deferred work.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// The name of the job type.
    ///
    /// This is used to associate queued messages and idempotency markers with this job. It should
    /// be unique among the jobs sharing a queue.
    const NAME: &'static str;
    /// The number of requeues allowed before the job is abandoned.
    const MAX_ATTEMPTS: u16 = 5;
    /// The arguments that must be present and non-empty before [`Job::execute`] is called.
    const REQUIRED_ARGUMENTS: &'static [Required] = &[Required::key(SUBJECT_ID)];
    /// How long the idempotency marker for a running instance is honoured.
    const IDEMPOTENCY_TTL: TimeDelta = DEFAULT_IDEMPOTENCY_TTL;
    /// What to do with an instance delivered while another one for the same key is running.
    const ON_DUPLICATE: OnDuplicate = OnDuplicate::Skip;
    /// The number of worker loops pulling this job type from the queue.
    const CONCURRENCY: usize = 1;

    /// Runs the work.
    ///
    /// Expected failures (missing upstream data, errors from external services) must be reported
    /// as [`Outcome::RecoverableFailure`]. A panic is treated as a fatal failure by the runner.
    async fn execute(&self, arguments: &JobArguments) -> Outcome;

    fn job_type() -> JobType {
        JobType::new(Self::NAME)
    }

    /// The retry policy used for recoverable failures which do not carry their own.
    fn retry_policy() -> RetryPolicy {
        RetryPolicy::new(Self::MAX_ATTEMPTS, DEFAULT_BACKOFF_STRATEGY)
    }

    /// How long an execution may run before it is cancelled and dropped as a fatal failure.
    ///
    /// Defaults to [`Job::IDEMPOTENCY_TTL`] so no execution outlives its idempotency marker. A job
    /// overriding this should keep it below its TTL, otherwise a duplicate may start once the
    /// marker expires.
    fn timeout(_arguments: &JobArguments) -> Option<Duration> {
        Self::IDEMPOTENCY_TTL.to_std().ok()
    }

    /// The key under which concurrent executions are deduplicated.
    ///
    /// Defaults to the job type and subject id. Returning [`None`] disables the idempotency guard
    /// for the given arguments.
    fn idempotency_key(arguments: &JobArguments) -> Option<IdempotencyKey> {
        arguments
            .subject_id()
            .map(|subject| IdempotencyKey::new(Self::job_type(), subject))
    }

    fn builder() -> JobBuilder<Self>
    where
        Self: Sized,
    {
        JobBuilder::default()
    }
}
