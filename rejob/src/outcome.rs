//! The result of a single execution attempt and the acknowledgement handed back to the queue.
use std::error::Error;

use chrono::TimeDelta;

use crate::scheduler::RetryPolicy;

/// The result of one execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The work is done; the job terminates.
    Success,
    /// The work could not be completed now but may succeed later.
    ///
    /// `retry` overrides the job's default [`RetryPolicy`] for this requeue, which is how a job
    /// waiting on a dependency applies its own attempt ceiling and delays.
    RecoverableFailure {
        reason: String,
        retry: Option<RetryPolicy>,
    },
    /// The work can never succeed with these arguments; the job terminates.
    FatalFailure { reason: String },
}

impl Outcome {
    pub fn recoverable(reason: impl Into<String>) -> Self {
        Self::RecoverableFailure {
            reason: reason.into(),
            retry: None,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::FatalFailure {
            reason: reason.into(),
        }
    }

    /// Maps a "did persistence succeed" flag to an outcome.
    ///
    /// A falsy result is recoverable: the write may succeed on a later attempt.
    pub fn from_saved(saved: bool, reason: impl Into<String>) -> Self {
        if saved {
            Self::Success
        } else {
            Self::recoverable(reason)
        }
    }

    /// Attach a retry policy to a recoverable outcome, other outcomes are returned unchanged.
    pub fn with_retry(self, policy: RetryPolicy) -> Self {
        match self {
            Self::RecoverableFailure { reason, .. } => Self::RecoverableFailure {
                reason,
                retry: Some(policy),
            },
            other => other,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// The label used for the `outcome` log field.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RecoverableFailure { .. } => "recoverable_failure",
            Self::FatalFailure { .. } => "fatal_failure",
        }
    }
}

/// An error raised while executing a job which knows whether it is worth retrying.
///
/// Implementors should enumerate their transient kinds explicitly instead of treating every error
/// as retryable.
///
/// # Example
///
/// ```
/// use rejob::outcome::{ExecutionError, Outcome};
///
/// #[derive(Debug, thiserror::Error)]
/// enum ApiError {
///     #[error("rate limited")]
///     RateLimited,
///     #[error("unauthorized")]
///     Unauthorized,
/// }
///
/// impl ExecutionError for ApiError {
///     fn error_type(&self) -> &'static str {
///         "api"
///     }
///
///     fn is_transient(&self) -> bool {
///         matches!(self, Self::RateLimited)
///     }
/// }
///
/// assert!(matches!(Outcome::from(ApiError::RateLimited), Outcome::RecoverableFailure { .. }));
/// assert!(matches!(Outcome::from(ApiError::Unauthorized), Outcome::FatalFailure { .. }));
/// ```
pub trait ExecutionError: Error + Send {
    fn error_type(&self) -> &'static str;

    fn is_transient(&self) -> bool;
}

impl<T> From<T> for Outcome
where
    T: ExecutionError + 'static,
{
    fn from(error: T) -> Self {
        let reason = format!("{}: {error}", error.error_type());
        if error.is_transient() {
            Self::recoverable(reason)
        } else {
            Self::fatal(reason)
        }
    }
}

/// The terminal signal returned to the queue runtime for every delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The job succeeded.
    Completed,
    /// The job was resubmitted as a new message with the given attempt number.
    Requeued { delay: TimeDelta, attempt: u16 },
    /// Retries were exhausted after `attempts` executions.
    Abandoned { attempts: u16 },
    /// The job failed fatally and was dropped.
    Dropped,
    /// Another instance with the same idempotency key was running; this one was dropped.
    Skipped,
    /// Another instance with the same idempotency key was running; this one was resubmitted
    /// unchanged.
    Deferred { delay: TimeDelta },
}

impl Ack {
    /// The label stored by persistent queues for an acknowledged message.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Requeued { .. } => "requeued",
            Self::Abandoned { .. } => "abandoned",
            Self::Dropped => "dropped",
            Self::Skipped => "skipped",
            Self::Deferred { .. } => "deferred",
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeDelta;

    use super::*;
    use crate::backoff::BackoffStrategy;

    #[derive(Debug, thiserror::Error)]
    enum StoreError {
        #[error("write conflict")]
        Conflict,
        #[error("row is corrupt")]
        Corrupt,
    }

    impl ExecutionError for StoreError {
        fn error_type(&self) -> &'static str {
            "store"
        }

        fn is_transient(&self) -> bool {
            matches!(self, Self::Conflict)
        }
    }

    #[test]
    fn transient_errors_are_recoverable() {
        assert_eq!(
            Outcome::from(StoreError::Conflict),
            Outcome::recoverable("store: write conflict")
        );
        assert_eq!(
            Outcome::from(StoreError::Corrupt),
            Outcome::fatal("store: row is corrupt")
        );
    }

    #[test]
    fn falsy_save_is_recoverable() {
        assert_eq!(Outcome::from_saved(true, "not saved"), Outcome::Success);
        assert_eq!(
            Outcome::from_saved(false, "not saved"),
            Outcome::recoverable("not saved")
        );
    }

    #[test]
    fn with_retry_only_touches_recoverable_outcomes() {
        let policy = RetryPolicy::new(3, BackoffStrategy::constant(TimeDelta::seconds(1)));

        assert_eq!(
            Outcome::recoverable("later").with_retry(policy),
            Outcome::RecoverableFailure {
                reason: "later".to_owned(),
                retry: Some(policy)
            }
        );
        assert_eq!(Outcome::Success.with_retry(policy), Outcome::Success);
    }
}
