//! Preventing concurrent execution of duplicate jobs.
//!
//! Before a job instance runs, the runner writes a marker for the instance's [`IdempotencyKey`]
//! into a shared store. A second instance delivered while the marker is live is not executed,
//! what happens to it instead is decided by the job's [`OnDuplicate`].
//!
//! The guard is scoped to *currently executing*: the marker is written after the arguments were
//! validated and removed on every exit path, including requeue. A retry waiting in the queue
//! holds no marker and acquires one again when it is delivered. Markers carry a TTL so a worker
//! dying mid execution does not lock a subject forever.
use std::fmt::Display;

use async_trait::async_trait;
use chrono::TimeDelta;
use thiserror::Error;

use crate::job::{arguments::JobArguments, JobType};

pub mod memory;

/// The key under which concurrent executions are deduplicated.
///
/// The key is made of the job type and the subject id. It can be widened with a signature over
/// selected arguments, so that for example two translations of the same subject into different
/// locales do not block each other.
///
/// Two different job types targeting the same subject never share a key.
///
/// # Example
///
/// ```
/// use rejob::{guard::IdempotencyKey, job::{arguments::JobArguments, JobType}};
///
/// let job_type = JobType::new("translate");
/// let arguments = JobArguments::new().with("subject_id", "X").with("locale", "fr");
///
/// let key = IdempotencyKey::new(job_type, "X");
/// assert_eq!(key.to_string(), "translate:X");
///
/// let widened = key.clone().widened_with(&arguments, &["locale"]);
/// assert_ne!(key, widened);
/// assert_eq!(widened.subject(), "X");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    job_type: JobType,
    subject: String,
    signature: Option<u64>,
}

impl IdempotencyKey {
    pub fn new(job_type: JobType, subject: impl Into<String>) -> Self {
        Self {
            job_type,
            subject: subject.into(),
            signature: None,
        }
    }

    /// Include the values of the given argument keys in the key.
    pub fn widened_with(self, arguments: &JobArguments, keys: &[&str]) -> Self {
        Self {
            signature: Some(arguments.signature(keys)),
            ..self
        }
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn signature(&self) -> Option<u64> {
        self.signature
    }
}

impl Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.job_type, self.subject)?;
        if let Some(signature) = self.signature {
            write!(f, ":{signature:016x}")?;
        }
        Ok(())
    }
}

/// What the runner does with an instance delivered while another instance with the same key is
/// executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDuplicate {
    /// Acknowledge and drop the duplicate.
    #[default]
    Skip,
    /// Enqueue the duplicate again, unchanged, after the given delay.
    ///
    /// The attempt counter is not incremented: a deferral is not a failure.
    Defer(TimeDelta),
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Idempotency store unavailable: {0}")]
    Unavailable(String),
    #[error("Idempotency store in bad state")]
    BadState,
}

/// A shared store of idempotency markers.
///
/// Implementations must make [`IdempotencyGuard::try_acquire`] a single atomic check-and-set: two
/// workers racing for the same key must never both acquire it.
#[async_trait]
pub trait IdempotencyGuard: Clone + Send + Sync + 'static {
    /// Write a marker for `key` living for `ttl`.
    ///
    /// Returns `false` when an unexpired marker already exists. An expired marker is taken over.
    async fn try_acquire(&self, key: &IdempotencyKey, ttl: TimeDelta) -> Result<bool, GuardError>;

    /// Remove the marker for `key`. Releasing a key that is not held is not an error.
    async fn release(&self, key: &IdempotencyKey) -> Result<(), GuardError>;

    /// Delete expired markers returning how many were removed.
    async fn prune_expired(&self) -> Result<u64, GuardError>;
}
