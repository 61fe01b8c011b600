//! Persistence of content entities.
use async_trait::async_trait;
use rejob::outcome::ExecutionError;
use thiserror::Error;

use crate::content::{Content, SeoFields, Translation};

/// Loads and updates content entities.
///
/// The `save_*` operations report whether the write took effect. A `false` is not an error: the
/// job reports a recoverable failure and the write is attempted again on a later attempt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn fetch(&self, subject_id: &str) -> Result<Option<Content>, StoreError>;

    async fn save_seo(&self, subject_id: &str, seo: &SeoFields) -> Result<bool, StoreError>;

    async fn save_tags(&self, subject_id: &str, tags: &[String]) -> Result<bool, StoreError>;

    async fn save_translation(
        &self,
        subject_id: &str,
        translation: &Translation,
    ) -> Result<bool, StoreError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("write conflict")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

impl ExecutionError for StoreError {
    fn error_type(&self) -> &'static str {
        "store"
    }

    fn is_transient(&self) -> bool {
        match self {
            Self::Conflict | Self::Unavailable(_) => true,
            Self::Corrupt(_) => false,
        }
    }
}
