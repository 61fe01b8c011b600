use std::sync::Arc;

use async_trait::async_trait;
use rejob::prelude::*;

use super::{forced, load, subject_id, EnrichmentError, TITLE};
use crate::{provider::EnrichmentProvider, store::ContentStore};

/// Generates the meta title, meta description and keywords of a subject.
///
/// Does nothing when the subject already has complete SEO data, unless the `force` argument is
/// set.
pub struct SeoUpdate {
    store: Arc<dyn ContentStore>,
    provider: Arc<dyn EnrichmentProvider>,
}

impl SeoUpdate {
    pub fn new(store: Arc<dyn ContentStore>, provider: Arc<dyn EnrichmentProvider>) -> Self {
        Self { store, provider }
    }

    async fn run(&self, arguments: &JobArguments) -> Result<Outcome, EnrichmentError> {
        let subject_id = subject_id(arguments)?;
        let content = load(self.store.as_ref(), &subject_id).await?;

        if content.seo.is_complete() && !forced(arguments) {
            tracing::debug!(subject_id = %subject_id, "SEO data already present for {subject_id}");
            return Ok(Outcome::Success);
        }

        let seo = self.provider.generate_seo(&content).await?;
        let saved = self.store.save_seo(&subject_id, &seo).await?;
        Ok(Outcome::from_saved(saved, "SEO data was not saved"))
    }
}

#[async_trait]
impl Job for SeoUpdate {
    const NAME: &'static str = "seo-update";
    const REQUIRED_ARGUMENTS: &'static [Required] =
        &[Required::key(SUBJECT_ID), Required::key(TITLE)];

    async fn execute(&self, arguments: &JobArguments) -> Outcome {
        self.run(arguments).await.unwrap_or_else(Outcome::from)
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use rejob::queue::memory::InMemoryQueue;

    use super::*;
    use crate::{
        content::{
            test::{complete_seo, content},
            Content, ContentKind, SeoFields,
        },
        jobs::{
            test::{deliver, runner},
            FORCE,
        },
        provider::{MockEnrichmentProvider, ProviderError},
        store::{MockContentStore, StoreError},
    };

    fn arguments() -> JobArguments {
        JobArguments::new()
            .with(SUBJECT_ID, "X")
            .with(TITLE, "Widget")
    }

    fn job(store: MockContentStore, provider: MockEnrichmentProvider) -> SeoUpdate {
        SeoUpdate::new(Arc::new(store), Arc::new(provider))
    }

    #[tokio::test]
    async fn complete_seo_succeeds_without_calling_the_provider() {
        let mut store = MockContentStore::new();
        store
            .expect_fetch()
            .withf(|subject| subject == "X")
            .times(1)
            .returning(|_| {
                Ok(Some(Content {
                    seo: complete_seo(),
                    ..content(ContentKind::Product)
                }))
            });
        store.expect_save_seo().never();
        let mut provider = MockEnrichmentProvider::new();
        provider.expect_generate_seo().never();

        let outcome = job(store, provider).execute(&arguments()).await;

        assert_eq!(outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn missing_seo_is_generated_and_saved() {
        let mut store = MockContentStore::new();
        store
            .expect_fetch()
            .returning(|_| Ok(Some(content(ContentKind::Article))));
        store
            .expect_save_seo()
            .withf(|subject, seo| subject == "X" && *seo == complete_seo())
            .times(1)
            .returning(|_, _| Ok(true));
        let mut provider = MockEnrichmentProvider::new();
        provider
            .expect_generate_seo()
            .withf(|content| content.title == "Widget")
            .times(1)
            .returning(|_| Ok(complete_seo()));

        let outcome = job(store, provider).execute(&arguments()).await;

        assert_eq!(outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn force_regenerates_complete_seo() {
        let mut store = MockContentStore::new();
        store.expect_fetch().returning(|_| {
            Ok(Some(Content {
                seo: complete_seo(),
                ..content(ContentKind::Page)
            }))
        });
        store.expect_save_seo().times(1).returning(|_, _| Ok(true));
        let mut provider = MockEnrichmentProvider::new();
        provider
            .expect_generate_seo()
            .times(1)
            .returning(|_| Ok(SeoFields::default()));

        let outcome = job(store, provider)
            .execute(&arguments().with(FORCE, true))
            .await;

        assert_eq!(outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn unsaved_seo_is_recoverable() {
        let mut store = MockContentStore::new();
        store
            .expect_fetch()
            .returning(|_| Ok(Some(content(ContentKind::Article))));
        store.expect_save_seo().returning(|_, _| Ok(false));
        let mut provider = MockEnrichmentProvider::new();
        provider
            .expect_generate_seo()
            .returning(|_| Ok(complete_seo()));

        let outcome = job(store, provider).execute(&arguments()).await;

        assert_eq!(outcome, Outcome::recoverable("SEO data was not saved"));
    }

    #[tokio::test]
    async fn provider_errors_are_classified() {
        let mut store = MockContentStore::new();
        store
            .expect_fetch()
            .returning(|_| Ok(Some(content(ContentKind::Article))));
        store.expect_save_seo().never();
        let mut provider = MockEnrichmentProvider::new();
        let mut responses: Vec<Result<SeoFields, ProviderError>> =
            vec![Err(ProviderError::Unauthorized), Err(ProviderError::RateLimited)];
        provider
            .expect_generate_seo()
            .times(2)
            .returning(move |_| responses.pop().unwrap());
        let job = job(store, provider);

        assert_matches!(
            job.execute(&arguments()).await,
            Outcome::RecoverableFailure { retry: None, .. }
        );
        assert_eq!(
            job.execute(&arguments()).await,
            Outcome::fatal("provider: unauthorized")
        );
    }

    #[tokio::test]
    async fn unknown_subject_is_fatal() {
        let mut store = MockContentStore::new();
        store.expect_fetch().returning(|_| Ok(None));
        let mut provider = MockEnrichmentProvider::new();
        provider.expect_generate_seo().never();

        let outcome = job(store, provider).execute(&arguments()).await;

        assert_eq!(outcome, Outcome::fatal("enrichment: subject X not found"));
    }

    #[tokio::test]
    async fn store_outage_is_recoverable() {
        let mut store = MockContentStore::new();
        store
            .expect_fetch()
            .returning(|_| Err(StoreError::Unavailable("connection reset".to_owned())));
        let provider = MockEnrichmentProvider::new();

        let outcome = job(store, provider).execute(&arguments()).await;

        assert_matches!(outcome, Outcome::RecoverableFailure { .. });
    }

    #[tokio::test]
    async fn missing_title_is_dropped_before_any_call() {
        let queue = InMemoryQueue::new().paused();
        let mut store = MockContentStore::new();
        store.expect_fetch().never();
        let mut provider = MockEnrichmentProvider::new();
        provider.expect_generate_seo().never();
        let runner = runner(job(store, provider), &queue);

        let delivery = deliver::<SeoUpdate>(
            &queue,
            JobArguments::new().with(SUBJECT_ID, "X").with(TITLE, ""),
        )
        .await;

        assert_eq!(runner.execute_job(delivery).await, Ack::Dropped);
        assert!(queue.pending(SeoUpdate::job_type()).is_empty());
    }
}
