//! Invalidating caches derived from a job's subject.
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use crate::job::JobType;

#[derive(Debug, Error)]
#[error("Cache invalidation failed: {0}")]
pub struct InvalidationError(pub String);

/// Invalidates cached views of a subject once a job has successfully changed it.
///
/// The runner calls [`CacheInvalidator::invalidate`] strictly after the job succeeded, before
/// releasing its idempotency marker and before acknowledging the delivery. A failure is logged
/// and does not change the job's outcome.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, job_type: JobType, subject_id: &str)
        -> Result<(), InvalidationError>;
}

/// An invalidator slot shared by every runner of a [`Rejob`](crate::Rejob), so setting it reaches
/// workers that are already running. Does nothing while empty.
#[derive(Clone, Default)]
pub(crate) struct SharedInvalidator(Arc<RwLock<Option<Arc<dyn CacheInvalidator>>>>);

impl SharedInvalidator {
    pub(crate) fn set(&self, invalidator: Arc<dyn CacheInvalidator>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(invalidator);
    }
}

#[async_trait]
impl CacheInvalidator for SharedInvalidator {
    async fn invalidate(
        &self,
        job_type: JobType,
        subject_id: &str,
    ) -> Result<(), InvalidationError> {
        let current = self
            .0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match current {
            Some(invalidator) => invalidator.invalidate(job_type, subject_id).await,
            None => Ok(()),
        }
    }
}
