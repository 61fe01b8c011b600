use rejob::{
    job::Job,
    queue::{DeliveryId, Queue},
    RejobError,
};

use crate::{
    config::EnrichmentConfig,
    content::Content,
    jobs::{seo::SeoUpdate, tags::TagUpdate, translate::Translate, LOCALE, TITLE},
};

/// Enqueues the enrichment jobs of a content entity once it has been saved.
///
/// Jobs disabled in the [`EnrichmentConfig`] are not enqueued. A translation job is enqueued per
/// configured locale; those wait for the SEO data on their own.
#[derive(Debug, Clone)]
pub struct EnrichmentProducer<Q> {
    queue: Q,
    config: EnrichmentConfig,
}

impl<Q: Queue> EnrichmentProducer<Q> {
    pub fn new(queue: Q, config: EnrichmentConfig) -> Self {
        Self { queue, config }
    }

    #[tracing::instrument(skip(self, content), fields(subject_id = %content.id))]
    pub async fn content_saved(&self, content: &Content) -> Result<Vec<DeliveryId>, RejobError> {
        let mut enqueued = Vec::new();

        if self.config.seo_enabled {
            enqueued.push(
                SeoUpdate::builder()
                    .with_subject(content.id.as_str())
                    .with_argument(TITLE, content.title.as_str())
                    .enqueue(&self.queue)
                    .await?,
            );
        }

        if self.config.tags_enabled {
            enqueued.push(
                TagUpdate::builder()
                    .with_subject(content.id.as_str())
                    .enqueue(&self.queue)
                    .await?,
            );
        }

        if self.config.translation_enabled {
            for locale in &self.config.locales {
                enqueued.push(
                    Translate::builder()
                        .with_subject(content.id.as_str())
                        .with_argument(LOCALE, locale.as_str())
                        .enqueue(&self.queue)
                        .await?,
                );
            }
        }

        tracing::debug!(
            count = enqueued.len(),
            "Enqueued enrichment jobs for {}",
            content.id
        );
        Ok(enqueued)
    }
}
