//! Waiting on upstream work without blocking a worker.
//!
//! A job that needs the result of another job checks its precondition at the start of
//! [`crate::job::Job::execute`]. When the precondition does not hold yet, the job does not sleep
//! or poll: it reports a recoverable outcome carrying the dependency's own [`RetryPolicy`] and
//! the runner requeues it with backoff. An upstream that never completes leads to the job being
//! abandoned once the policy's attempts are exhausted.
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use chrono::TimeDelta;
//! use rejob::prelude::*;
//!
//! const SEO_READY: Dependency = Dependency::new("SEO data not yet available")
//!     .with_policy(RetryPolicy::linear(5, TimeDelta::seconds(10)));
//!
//! struct Translate;
//!
//! #[async_trait]
//! impl Job for Translate {
//!     const NAME: &'static str = "translate";
//!
//!     async fn execute(&self, arguments: &JobArguments) -> Outcome {
//!         let seo_ready = arguments.get("seo_ready").and_then(ArgValue::as_bool);
//!         if let Err(outcome) = SEO_READY.require(seo_ready == Some(true)) {
//!             return outcome;
//!         }
//!         Outcome::Success
//!     }
//! }
//! ```
use chrono::TimeDelta;

use crate::{outcome::Outcome, scheduler::RetryPolicy};

/// The policy used by a [`Dependency`] unless it is given one: five attempts, ten seconds apart
/// growing linearly.
pub const DEFAULT_DEPENDENCY_POLICY: RetryPolicy = RetryPolicy::linear(5, TimeDelta::seconds(10));

/// A precondition on work done by another job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dependency {
    reason: &'static str,
    policy: RetryPolicy,
}

impl Dependency {
    pub const fn new(reason: &'static str) -> Self {
        Self {
            reason,
            policy: DEFAULT_DEPENDENCY_POLICY,
        }
    }

    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub const fn reason(&self) -> &'static str {
        self.reason
    }

    /// The outcome to return when the precondition does not hold.
    pub fn unmet(&self) -> Outcome {
        tracing::debug!(reason = self.reason, "Dependency not met: {}", self.reason);
        Outcome::recoverable(self.reason).with_retry(self.policy)
    }

    /// `Ok(())` when `satisfied`, otherwise the outcome to return from the job.
    pub fn require(&self, satisfied: bool) -> Result<(), Outcome> {
        if satisfied {
            Ok(())
        } else {
            Err(self.unmet())
        }
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;
    use crate::backoff::BackoffStrategy;

    #[test]
    fn unmet_carries_default_policy() {
        let dependency = Dependency::new("SEO data not yet available");

        assert_eq!(
            dependency.unmet(),
            Outcome::RecoverableFailure {
                reason: "SEO data not yet available".to_owned(),
                retry: Some(DEFAULT_DEPENDENCY_POLICY),
            }
        );
        assert_eq!(DEFAULT_DEPENDENCY_POLICY.max_attempts, 5);
        assert_eq!(DEFAULT_DEPENDENCY_POLICY.delay_for(0), TimeDelta::seconds(10));
    }

    #[test]
    fn custom_policy_is_used() {
        let policy = RetryPolicy::new(2, BackoffStrategy::constant(TimeDelta::seconds(1)));
        let dependency = Dependency::new("waiting").with_policy(policy);

        assert_matches!(
            dependency.unmet(),
            Outcome::RecoverableFailure { retry: Some(retry), .. } if retry == policy
        );
    }

    #[test]
    fn require_only_fails_when_unsatisfied() {
        let dependency = Dependency::new("waiting");

        assert_eq!(dependency.require(true), Ok(()));
        assert_eq!(dependency.require(false), Err(dependency.unmet()));
    }
}
