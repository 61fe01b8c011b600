use std::marker::PhantomData;

use chrono::{DateTime, TimeDelta, Utc};

use super::{
    arguments::{ArgValue, JobArguments, SUBJECT_ID},
    Job,
};
use crate::{
    queue::{scheduled_in, DeliveryId, EnqueuedJob, Queue},
    RejobError,
};

/// Builds and enqueues a job instance.
///
/// # Example
///
/// ```
/// # use rejob::prelude::*;
/// # struct SeoUpdate;
/// # #[async_trait::async_trait]
/// # impl Job for SeoUpdate {
/// #     const NAME: &'static str = "seo-update";
/// #     async fn execute(&self, _arguments: &JobArguments) -> Outcome {
/// #         Outcome::Success
/// #     }
/// # }
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// use rejob::queue::memory::InMemoryQueue;
///
/// let queue = InMemoryQueue::new().paused();
///
/// SeoUpdate::builder()
///     .with_subject("X")
///     .with_argument("title", "Widget")
///     .enqueue(&queue)
///     .await
///     .unwrap();
///
/// assert_eq!(queue.pending(SeoUpdate::job_type()).len(), 1);
/// # });
/// ```
pub struct JobBuilder<J> {
    arguments: JobArguments,
    scheduled_at: DateTime<Utc>,
    _job: PhantomData<J>,
}

impl<J> Default for JobBuilder<J> {
    fn default() -> Self {
        Self {
            arguments: Default::default(),
            scheduled_at: Utc::now(),
            _job: PhantomData,
        }
    }
}

impl<J> JobBuilder<J>
where
    J: Job,
{
    pub fn with_subject(self, subject_id: impl Into<ArgValue>) -> Self {
        self.with_argument(SUBJECT_ID, subject_id)
    }

    pub fn with_argument(self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        Self {
            arguments: self.arguments.with(key, value),
            ..self
        }
    }

    /// Replace all arguments, including the attempt counter.
    pub fn with_arguments(self, arguments: JobArguments) -> Self {
        Self { arguments, ..self }
    }

    pub fn schedule_at(self, schedule_at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at: schedule_at,
            ..self
        }
    }

    pub fn schedule_in(self, schedule_in: TimeDelta) -> Self {
        Self {
            scheduled_at: scheduled_in(schedule_in),
            ..self
        }
    }

    pub async fn enqueue<Q: Queue>(self, queue: &Q) -> Result<DeliveryId, RejobError> {
        let id = queue
            .enqueue(EnqueuedJob {
                job_type: J::job_type(),
                arguments: self.arguments,
                scheduled_at: self.scheduled_at,
            })
            .await?;

        Ok(id)
    }
}
