//! The enrichment jobs.
//!
//! Every job loads the subject from the [`ContentStore`], asks the [`EnrichmentProvider`] for the
//! missing data and writes it back. Store and provider errors are classified through
//! [`ExecutionError`], so a rate limited provider is retried while a corrupt record is not.
//!
//! [`EnrichmentProvider`]: crate::provider::EnrichmentProvider
use rejob::{
    job::arguments::{JobArguments, SUBJECT_ID},
    outcome::ExecutionError,
};
use thiserror::Error;

use crate::{
    content::Content,
    provider::ProviderError,
    store::{ContentStore, StoreError},
};

pub mod seo;
pub mod tags;
pub mod translate;

pub const TITLE: &str = "title";
pub const LOCALE: &str = "locale";
/// Regenerate data which is already present.
pub const FORCE: &str = "force";

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("subject {0} not found")]
    SubjectNotFound(String),
    #[error("missing argument {0}")]
    MissingArgument(&'static str),
}

impl ExecutionError for EnrichmentError {
    fn error_type(&self) -> &'static str {
        match self {
            Self::Store(error) => error.error_type(),
            Self::Provider(error) => error.error_type(),
            Self::SubjectNotFound(_) | Self::MissingArgument(_) => "enrichment",
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            Self::Store(error) => error.is_transient(),
            Self::Provider(error) => error.is_transient(),
            Self::SubjectNotFound(_) | Self::MissingArgument(_) => false,
        }
    }
}

fn subject_id(arguments: &JobArguments) -> Result<String, EnrichmentError> {
    arguments
        .subject_id()
        .ok_or(EnrichmentError::MissingArgument(SUBJECT_ID))
}

fn forced(arguments: &JobArguments) -> bool {
    arguments
        .get(FORCE)
        .and_then(|value| value.as_bool())
        .unwrap_or(false)
}

async fn load(store: &dyn ContentStore, subject_id: &str) -> Result<Content, EnrichmentError> {
    store
        .fetch(subject_id)
        .await?
        .ok_or_else(|| EnrichmentError::SubjectNotFound(subject_id.to_owned()))
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::Arc;

    use chrono::Utc;
    use rejob::{
        guard::memory::InMemoryGuard,
        job::{runner::JobRunner, Job},
        queue::{memory::InMemoryQueue, Delivery, EnqueuedJob, Queue},
    };

    use super::*;

    pub(crate) async fn deliver<J: Job>(
        queue: &InMemoryQueue,
        arguments: JobArguments,
    ) -> Delivery {
        queue
            .enqueue(EnqueuedJob {
                job_type: J::job_type(),
                arguments,
                scheduled_at: Utc::now(),
            })
            .await
            .unwrap();
        queue.take_next(J::job_type()).unwrap()
    }

    pub(crate) fn runner<J: Job>(
        job: J,
        queue: &InMemoryQueue,
    ) -> JobRunner<InMemoryQueue, InMemoryGuard, J> {
        JobRunner::new(Arc::new(job), queue.clone(), InMemoryGuard::new())
    }

    #[test]
    fn errors_keep_their_classification() {
        use rejob::outcome::Outcome;

        assert!(matches!(
            Outcome::from(EnrichmentError::from(StoreError::Conflict)),
            Outcome::RecoverableFailure { .. }
        ));
        assert_eq!(
            Outcome::from(EnrichmentError::from(StoreError::Corrupt("bad json".to_owned()))),
            Outcome::fatal("store: stored record is corrupt: bad json")
        );
        assert_eq!(
            Outcome::from(EnrichmentError::SubjectNotFound("X".to_owned())),
            Outcome::fatal("enrichment: subject X not found")
        );
    }
}
