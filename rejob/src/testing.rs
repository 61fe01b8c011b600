//! Helpers for testing.
#![allow(clippy::vec_init_then_push)]

/// A macro for making assertions about what jobs have been enqueued to an
/// [`InMemoryQueue`](crate::queue::memory::InMemoryQueue).
///
/// Every message ever enqueued is considered, including ones already delivered. Assertions can be
/// based on the job, the subject, individual arguments, the attempt counter, and the scheduled
/// time.
///
/// # Example
///
/// ```
/// # use rejob::prelude::*;
/// # use rejob::testing::assert_enqueued;
/// # use chrono::{Utc, TimeDelta};
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
/// let scheduled_at = Utc::now() + TimeDelta::minutes(5);
///
/// SeoUpdate::builder()
///     .with_subject("X")
///     .with_argument("title", "Widget")
///     .schedule_at(scheduled_at)
///     .enqueue(&queue)
///     .await
///     .unwrap();
///
/// assert_enqueued!(
///     to: queue,
///     with_subject: "X",
///     scheduled_at: scheduled_at,
///     for_job: SeoUpdate
/// );
///
/// assert_enqueued!(
///     1 job,
///     to: queue,
///     with_argument: ("title", "Widget"),
///     with_attempt: 0,
///     for_job_type: "seo-update",
/// );
///
/// assert_enqueued!(
///     0 jobs,
///     to: queue,
///     with_subject: "Y",
///     scheduled_before: Utc::now() + TimeDelta::hours(1),
///     for_job: SeoUpdate
/// );
/// # });
/// ```
#[macro_export]
macro_rules! assert_enqueued {
    (1 job, to: $queue:ident, $($tail:tt)*) => {
        $crate::assert_enqueued!(@internal 1 to: $queue, $($tail)*);
    };
    ($n:literal jobs, to: $queue:ident, $($tail:tt)*) => {
        $crate::assert_enqueued!(@internal $n to: $queue, $($tail)*);
    };
    (to: $queue:ident, $($tail:tt)*) => {
        $crate::assert_enqueued!(@any to: $queue, $($tail)*);
    };
    (@any to: $queue:ident, $($tail:tt)*) => {{
        let mut filters: Vec<Box<dyn Fn(&$crate::queue::EnqueuedJob) -> bool>> = Vec::new();
        $crate::assert_enqueued!(@filter filters; $($tail)*);
        let all_jobs = $queue.enqueued();
        let jobs = all_jobs
            .iter()
            .filter(|job| filters.iter().all(|filter| filter(job)))
            .collect::<Vec<_>>();
        assert!(
            !jobs.is_empty(),
            "No jobs enqueued {}\n\nAll enqueued jobs:\n{all_jobs:#?}",
            stringify!($($tail)*)
        );
    }};
    (@internal $n:literal to: $queue:ident, $($tail:tt)*) => {{
        let mut filters: Vec<Box<dyn Fn(&$crate::queue::EnqueuedJob) -> bool>> = Vec::new();
        $crate::assert_enqueued!(@filter filters; $($tail)*);
        let all_jobs = $queue.enqueued();
        let jobs = all_jobs
            .iter()
            .filter(|job| filters.iter().all(|filter| filter(job)))
            .collect::<Vec<_>>();
        assert!(
            jobs.len() == $n,
            "Unexpected number of jobs enqueued {},\n\n\
            Expected {} jobs, found {} matching job enqueued:\n\n\
            Matching jobs:\n\
            {jobs:#?}\n\n\
            All enqueued jobs:\n\
            {all_jobs:#?}",
            stringify!($($tail)*),
            $n,
            jobs.len(),
        );
    }};
    (@filter $vec:ident;) => {};
    (@filter $vec:ident; for_job: $job:path $(, $($tail:tt)*)?) => {
        $vec.push(Box::new(|job: &$crate::queue::EnqueuedJob| {
            job.job_type.as_str() == <$job as $crate::job::Job>::NAME
        }));
        $($crate::assert_enqueued!(@filter $vec; $($tail)*);)?
    };
    (@filter $vec:ident; for_job_type: $name:literal $(, $($tail:tt)*)?) => {
        $vec.push(Box::new(|job: &$crate::queue::EnqueuedJob| job.job_type.as_str() == $name));
        $($crate::assert_enqueued!(@filter $vec; $($tail)*);)?
    };
    (@filter $vec:ident; with_subject: $subject:expr $(, $($tail:tt)*)?) => {
        let subject = $crate::job::arguments::ArgValue::from($subject).to_string();
        $vec.push(Box::new(move |job: &$crate::queue::EnqueuedJob| {
            job.arguments.subject_id().as_deref() == Some(subject.as_str())
        }));
        $($crate::assert_enqueued!(@filter $vec; $($tail)*);)?
    };
    (@filter $vec:ident; with_argument: ($key:expr, $value:expr) $(, $($tail:tt)*)?) => {
        let key: String = $key.into();
        let value = $crate::job::arguments::ArgValue::from($value);
        $vec.push(Box::new(move |job: &$crate::queue::EnqueuedJob| {
            job.arguments.get(&key) == Some(&value)
        }));
        $($crate::assert_enqueued!(@filter $vec; $($tail)*);)?
    };
    (@filter $vec:ident; with_attempt: $attempt:expr $(, $($tail:tt)*)?) => {
        let attempt: u16 = $attempt;
        $vec.push(Box::new(move |job: &$crate::queue::EnqueuedJob| {
            job.arguments.attempt() == attempt
        }));
        $($crate::assert_enqueued!(@filter $vec; $($tail)*);)?
    };
    (@filter $vec:ident; scheduled_at: $scheduled_at:expr $(, $($tail:tt)*)?) => {
        let scheduled_at: ::chrono::DateTime<::chrono::Utc> = $scheduled_at;
        $vec.push(Box::new(move |job: &$crate::queue::EnqueuedJob| {
            job.scheduled_at == scheduled_at
        }));
        $($crate::assert_enqueued!(@filter $vec; $($tail)*);)?
    };
    (@filter $vec:ident; scheduled_after: $scheduled_after:expr $(, $($tail:tt)*)?) => {
        let scheduled_after: ::chrono::DateTime<::chrono::Utc> = $scheduled_after;
        $vec.push(Box::new(move |job: &$crate::queue::EnqueuedJob| {
            job.scheduled_at > scheduled_after
        }));
        $($crate::assert_enqueued!(@filter $vec; $($tail)*);)?
    };
    (@filter $vec:ident; scheduled_before: $scheduled_before:expr $(, $($tail:tt)*)?) => {
        let scheduled_before: ::chrono::DateTime<::chrono::Utc> = $scheduled_before;
        $vec.push(Box::new(move |job: &$crate::queue::EnqueuedJob| {
            job.scheduled_at < scheduled_before
        }));
        $($crate::assert_enqueued!(@filter $vec; $($tail)*);)?
    };
}

pub use assert_enqueued;

#[cfg(test)]
mod test {
    use chrono::{TimeDelta, Utc};

    use crate::{
        job::{arguments::SUBJECT_ID, test::SimpleJob, Job},
        queue::memory::InMemoryQueue,
        scheduler::{BackoffScheduler, RetryPolicy},
    };

    #[tokio::test]
    async fn assert_enqueued() {
        let queue = InMemoryQueue::new().paused();
        let scheduled_at = Utc::now() + TimeDelta::minutes(5);

        SimpleJob::builder()
            .with_subject("X")
            .with_argument("locale", "fr")
            .schedule_at(scheduled_at)
            .enqueue(&queue)
            .await
            .unwrap();

        assert_enqueued!(
            1 job,
            to: queue,
            with_subject: "X",
            for_job: SimpleJob
        );
        assert_enqueued!(
            to: queue,
            with_argument: ("locale", "fr"),
            for_job_type: "simple_job",
        );
        assert_enqueued!(
            to: queue,
            scheduled_at: scheduled_at,
            for_job: SimpleJob
        );
        assert_enqueued!(
            to: queue,
            scheduled_after: Utc::now(),
            scheduled_before: Utc::now() + TimeDelta::hours(1),
            for_job: SimpleJob,
        );
        assert_enqueued!(
            0 jobs,
            to: queue,
            with_argument: ("locale", "de"),
            for_job: SimpleJob
        );
    }

    #[tokio::test]
    async fn assert_enqueued_sees_requeued_attempts() {
        let queue = InMemoryQueue::new().paused();
        let scheduler = BackoffScheduler::new(queue.clone());
        let arguments = crate::job::arguments::JobArguments::new().with(SUBJECT_ID, 7);

        scheduler
            .requeue(
                SimpleJob::job_type(),
                &arguments,
                "waiting",
                RetryPolicy::linear(5, TimeDelta::seconds(10)),
            )
            .await
            .unwrap();

        assert_enqueued!(
            1 job,
            to: queue,
            with_subject: 7,
            with_attempt: 1,
            for_job: SimpleJob
        );
        assert_enqueued!(0 jobs, to: queue, with_attempt: 0, for_job: SimpleJob);
    }
}
