//! The external service generating enrichment data.
use std::collections::BTreeMap;

use async_trait::async_trait;
use rejob::outcome::ExecutionError;
use thiserror::Error;

use crate::content::{Content, SeoFields, TranslatableFields};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    async fn generate_seo(&self, content: &Content) -> Result<SeoFields, ProviderError>;

    async fn generate_tags(&self, content: &Content, limit: usize)
        -> Result<Vec<String>, ProviderError>;

    /// Translate every entry of `fields` into `locale`, keyed by field name.
    async fn translate(
        &self,
        fields: &TranslatableFields,
        locale: &str,
    ) -> Result<BTreeMap<String, String>, ProviderError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("rate limited")]
    RateLimited,
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("request timed out")]
    Timeout,
    #[error("response could not be parsed: {0}")]
    MalformedResponse(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ExecutionError for ProviderError {
    fn error_type(&self) -> &'static str {
        "provider"
    }

    fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited
            | Self::Unavailable(_)
            | Self::Timeout
            | Self::MalformedResponse(_) => true,
            Self::Unauthorized | Self::InvalidRequest(_) => false,
        }
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use rejob::outcome::Outcome;

    use super::*;

    #[test]
    fn transient_kinds_are_recoverable() {
        for error in [
            ProviderError::RateLimited,
            ProviderError::Unavailable("503".to_owned()),
            ProviderError::Timeout,
            ProviderError::MalformedResponse("not json".to_owned()),
        ] {
            assert_matches!(Outcome::from(error), Outcome::RecoverableFailure { .. });
        }
    }

    #[test]
    fn configuration_errors_are_fatal() {
        assert_eq!(
            Outcome::from(ProviderError::Unauthorized),
            Outcome::fatal("provider: unauthorized")
        );
        assert_matches!(
            Outcome::from(ProviderError::InvalidRequest("prompt too long".to_owned())),
            Outcome::FatalFailure { .. }
        );
    }
}
