use std::sync::Arc;

use async_trait::async_trait;
use rejob::prelude::*;

use super::{forced, load, subject_id, EnrichmentError};
use crate::{provider::EnrichmentProvider, store::ContentStore};

/// Generates the tags of a subject.
pub struct TagUpdate {
    store: Arc<dyn ContentStore>,
    provider: Arc<dyn EnrichmentProvider>,
    max_tags: usize,
}

impl TagUpdate {
    pub fn new(
        store: Arc<dyn ContentStore>,
        provider: Arc<dyn EnrichmentProvider>,
        max_tags: usize,
    ) -> Self {
        Self {
            store,
            provider,
            max_tags,
        }
    }

    async fn run(&self, arguments: &JobArguments) -> Result<Outcome, EnrichmentError> {
        let subject_id = subject_id(arguments)?;
        let content = load(self.store.as_ref(), &subject_id).await?;

        if !content.tags.is_empty() && !forced(arguments) {
            tracing::debug!(subject_id = %subject_id, "Tags already present for {subject_id}");
            return Ok(Outcome::Success);
        }

        let generated = self
            .provider
            .generate_tags(&content, self.max_tags)
            .await?;
        let tags = normalize(generated, self.max_tags);
        if tags.is_empty() {
            return Ok(Outcome::recoverable("no tags were generated"));
        }

        let saved = self.store.save_tags(&subject_id, &tags).await?;
        Ok(Outcome::from_saved(saved, "tags were not saved"))
    }
}

/// Lowercase, trim and deduplicate, keeping the provider's order.
fn normalize(tags: Vec<String>, limit: usize) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(limit);
    for tag in tags {
        if normalized.len() >= limit {
            break;
        }
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    normalized
}

#[async_trait]
impl Job for TagUpdate {
    const NAME: &'static str = "tag-update";

    async fn execute(&self, arguments: &JobArguments) -> Outcome {
        self.run(arguments).await.unwrap_or_else(Outcome::from)
    }
}
