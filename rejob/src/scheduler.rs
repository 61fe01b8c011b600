//! Deciding whether and when a job is retried.
//!
//! There is no separate retry state: the requeued message *is* the state. The scheduler reads the
//! attempt counter from the arguments of the failed instance, and either abandons the job or
//! enqueues a copy of the arguments with the attempt incremented to the same job type with a
//! delay.
use chrono::TimeDelta;
use tracing::instrument;

use crate::{
    backoff::{BackoffStrategy, Strategy},
    job::{arguments::JobArguments, JobType},
    queue::{scheduled_in, EnqueuedJob, Queue, QueueError},
};

/// How many times, and how far apart, a job is retried.
///
/// # Example
///
/// ```
/// # use rejob::prelude::*;
/// # use chrono::TimeDelta;
/// let policy = RetryPolicy::linear(5, TimeDelta::seconds(10));
///
/// assert_eq!(policy.delay_for(0), TimeDelta::seconds(10));
/// assert_eq!(policy.delay_for(4), TimeDelta::seconds(50));
/// assert!(!policy.is_exhausted(4));
/// assert!(policy.is_exhausted(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// The number of requeues allowed. An instance with `attempt >= max_attempts` is abandoned.
    pub max_attempts: u16,
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u16, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// A policy using linear backoff: `base * (attempt + 1)`.
    pub const fn linear(max_attempts: u16, base: TimeDelta) -> Self {
        Self::new(max_attempts, BackoffStrategy::linear(base))
    }

    pub fn delay_for(&self, attempt: u16) -> TimeDelta {
        self.backoff.backoff(attempt)
    }

    pub fn is_exhausted(&self, attempt: u16) -> bool {
        attempt >= self.max_attempts
    }
}

/// The decision taken for a recoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The job was resubmitted with `attempt` after `delay`.
    Requeued { delay: TimeDelta, attempt: u16 },
    /// Retries are exhausted; `attempts` is the number of executions made.
    Abandon { attempts: u16 },
}

/// Resubmits failed jobs to their own queue with an incremented attempt counter.
#[derive(Debug, Clone)]
pub struct BackoffScheduler<Q> {
    queue: Q,
}

impl<Q> BackoffScheduler<Q>
where
    Q: Queue,
{
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }

    /// Requeue `original` unless its attempt counter has reached the policy's ceiling.
    ///
    /// The delay is a scheduling hint for the queue's delayed delivery; retries may still arrive
    /// out of order, the attempt counter stays authoritative.
    #[instrument(skip(self, original, policy), fields(subject_id, attempt = original.attempt()))]
    pub async fn requeue(
        &self,
        job_type: JobType,
        original: &JobArguments,
        reason: &str,
        policy: RetryPolicy,
    ) -> Result<Decision, QueueError> {
        let attempt = original.attempt();
        let subject_id = original.subject_id().unwrap_or_default();
        tracing::Span::current().record("subject_id", subject_id.as_str());

        if policy.is_exhausted(attempt) {
            let attempts = attempt.saturating_add(1);
            tracing::error!(
                %job_type,
                %subject_id,
                attempt,
                outcome = "abandoned",
                reason,
                "Job {job_type} for subject {subject_id} abandoned after {attempts} attempts: {reason}",
            );
            return Ok(Decision::Abandon { attempts });
        }

        let delay = policy.delay_for(attempt);
        let arguments = original.next_attempt();
        let next_attempt = arguments.attempt();

        self.queue
            .enqueue(EnqueuedJob {
                job_type,
                arguments,
                scheduled_at: scheduled_in(delay),
            })
            .await?;

        tracing::warn!(
            %job_type,
            %subject_id,
            attempt,
            outcome = "requeued",
            reason,
            "Job {job_type} for subject {subject_id} will be retried in {delay} as attempt {next_attempt}: {reason}",
        );

        Ok(Decision::Requeued {
            delay,
            attempt: next_attempt,
        })
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::{
        backoff::MAX_DELAY,
        job::arguments::SUBJECT_ID,
        queue::{memory::InMemoryQueue, saturating_add},
    };

    const JOB_TYPE: JobType = JobType::new("translate");

    fn arguments() -> JobArguments {
        JobArguments::new()
            .with(SUBJECT_ID, "X")
            .with("title", "Widget")
    }

    #[tokio::test]
    async fn requeue_enqueues_next_attempt_with_delay() {
        let queue = InMemoryQueue::new().paused();
        let scheduler = BackoffScheduler::new(queue.clone());
        let before = Utc::now();

        let decision = scheduler
            .requeue(
                JOB_TYPE,
                &arguments().with_attempt(2),
                "dependency not yet satisfied",
                RetryPolicy::linear(5, TimeDelta::seconds(10)),
            )
            .await
            .unwrap();

        assert_eq!(
            decision,
            Decision::Requeued {
                delay: TimeDelta::seconds(30),
                attempt: 3
            }
        );
        let enqueued = queue.enqueued();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].job_type, JOB_TYPE);
        assert_eq!(enqueued[0].arguments, arguments().with_attempt(3));
        assert!(enqueued[0].scheduled_at >= before + TimeDelta::seconds(30));
    }

    #[tokio::test]
    async fn requeue_abandons_when_attempts_exhausted() {
        let queue = InMemoryQueue::new().paused();
        let scheduler = BackoffScheduler::new(queue.clone());

        let decision = scheduler
            .requeue(
                JOB_TYPE,
                &arguments().with_attempt(5),
                "dependency not yet satisfied",
                RetryPolicy::linear(5, TimeDelta::seconds(10)),
            )
            .await
            .unwrap();

        assert_matches!(decision, Decision::Abandon { attempts: 6 });
        assert!(queue.enqueued().is_empty());
    }

    #[tokio::test]
    async fn zero_max_attempts_never_requeues() {
        let queue = InMemoryQueue::new().paused();
        let scheduler = BackoffScheduler::new(queue.clone());

        let decision = scheduler
            .requeue(
                JOB_TYPE,
                &arguments(),
                "no retries",
                RetryPolicy::linear(0, TimeDelta::seconds(10)),
            )
            .await
            .unwrap();

        assert_matches!(decision, Decision::Abandon { attempts: 1 });
        assert!(queue.enqueued().is_empty());
    }

    #[tokio::test]
    async fn requeue_delays_grow_linearly_until_abandoned() {
        let queue = InMemoryQueue::new().paused();
        let scheduler = BackoffScheduler::new(queue.clone());
        let policy = RetryPolicy::linear(5, TimeDelta::seconds(10));

        let mut arguments = arguments();
        let mut delays = vec![];
        loop {
            match scheduler
                .requeue(JOB_TYPE, &arguments, "waiting", policy)
                .await
                .unwrap()
            {
                Decision::Requeued { delay, .. } => {
                    delays.push(delay.num_seconds());
                    arguments = queue.take_next(JOB_TYPE).unwrap().arguments;
                }
                Decision::Abandon { attempts } => {
                    assert_eq!(attempts, 6);
                    break;
                }
            }
        }

        assert_eq!(delays, vec![10, 20, 30, 40, 50]);
        assert_eq!(queue.enqueued().len(), 5);
    }

    #[tokio::test]
    async fn late_exponential_attempts_are_capped_at_max_delay() {
        let queue = InMemoryQueue::new().paused();
        let scheduler = BackoffScheduler::new(queue.clone());
        let policy = RetryPolicy::new(64, BackoffStrategy::exponential(TimeDelta::seconds(1)));

        let decision = scheduler
            .requeue(JOB_TYPE, &arguments().with_attempt(50), "waiting", policy)
            .await
            .unwrap();

        assert_eq!(
            decision,
            Decision::Requeued {
                delay: MAX_DELAY,
                attempt: 51
            }
        );
        assert!(queue.enqueued()[0].scheduled_at <= Utc::now() + MAX_DELAY);
    }

    #[test]
    fn scheduling_saturates_at_the_calendar_bounds() {
        let now = Utc::now();

        assert_eq!(saturating_add(now, TimeDelta::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(saturating_add(now, TimeDelta::MIN), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            saturating_add(now, TimeDelta::seconds(1)),
            now + TimeDelta::seconds(1)
        );
    }
}
