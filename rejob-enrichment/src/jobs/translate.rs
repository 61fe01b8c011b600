use std::sync::Arc;

use async_trait::async_trait;
use rejob::prelude::*;

use super::{load, subject_id, EnrichmentError, LOCALE};
use crate::{
    content::Translation,
    provider::EnrichmentProvider,
    store::ContentStore,
};

/// The translation reads the generated meta description, it waits for `seo-update` by default.
pub const SEO_READY: Dependency = Dependency::new("SEO data not yet available");

/// Translates a subject's fields.
///
/// A message carrying a `locale` argument translates into that locale only, otherwise into every
/// locale the job was built with. Runs only once the subject's SEO data is complete. Until then
/// every attempt is requeued with the dependency's retry policy and the job is abandoned once that
/// policy is exhausted.
pub struct Translate {
    store: Arc<dyn ContentStore>,
    provider: Arc<dyn EnrichmentProvider>,
    locales: Vec<String>,
    seo_ready: Dependency,
}

impl Translate {
    pub fn new(
        store: Arc<dyn ContentStore>,
        provider: Arc<dyn EnrichmentProvider>,
        locales: Vec<String>,
    ) -> Self {
        Self {
            store,
            provider,
            locales,
            seo_ready: SEO_READY,
        }
    }

    pub fn with_seo_dependency(mut self, seo_ready: Dependency) -> Self {
        self.seo_ready = seo_ready;
        self
    }

    async fn run(&self, arguments: &JobArguments) -> Result<Outcome, EnrichmentError> {
        let subject_id = subject_id(arguments)?;
        let content = load(self.store.as_ref(), &subject_id).await?;

        if let Err(waiting) = self.seo_ready.require(content.seo.is_complete()) {
            return Ok(waiting);
        }

        let locales = match arguments.get_str(LOCALE) {
            Some(locale) => vec![locale],
            None => self.locales.iter().map(String::as_str).collect(),
        };
        if locales.is_empty() {
            tracing::debug!(subject_id = %subject_id, "No locales to translate {subject_id} into");
            return Ok(Outcome::Success);
        }

        let fields = content.translatable_fields();
        let mut unsaved = Vec::new();
        for locale in locales {
            let translated = self.provider.translate(&fields, locale).await?;
            let translation = Translation {
                locale: locale.to_owned(),
                kind: fields.kind(),
                fields: translated,
            };

            if !self
                .store
                .save_translation(&subject_id, &translation)
                .await?
            {
                unsaved.push(locale);
            }
        }

        Ok(Outcome::from_saved(
            unsaved.is_empty(),
            format!("translation to {} was not saved", unsaved.join(", ")),
        ))
    }
}

#[async_trait]
impl Job for Translate {
    const NAME: &'static str = "translate";

    async fn execute(&self, arguments: &JobArguments) -> Outcome {
        self.run(arguments).await.unwrap_or_else(Outcome::from)
    }

    /// One translation per subject and locale may run at a time. Messages without a locale share
    /// the subject's key.
    fn idempotency_key(arguments: &JobArguments) -> Option<IdempotencyKey> {
        arguments.subject_id().map(|subject| {
            let key = IdempotencyKey::new(Self::job_type(), subject);
            if arguments.contains_key(LOCALE) {
                key.widened_with(arguments, &[LOCALE])
            } else {
                key
            }
        })
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use chrono::TimeDelta;
    use rejob::{queue::memory::InMemoryQueue, scheduler::RetryPolicy};

    use super::*;
    use crate::{
        config::EnrichmentConfig,
        content::{
            test::{complete_seo, content},
            Content, ContentKind, TranslatableFields,
        },
        jobs::test::{deliver, runner},
        provider::MockEnrichmentProvider,
        store::MockContentStore,
    };

    fn arguments(locale: &str) -> JobArguments {
        JobArguments::new()
            .with(SUBJECT_ID, "X")
            .with(LOCALE, locale)
    }

    fn job(store: MockContentStore, provider: MockEnrichmentProvider) -> Translate {
        Translate::new(
            Arc::new(store),
            Arc::new(provider),
            vec!["fr".to_owned(), "de".to_owned()],
        )
    }

    fn with_seo(kind: ContentKind) -> Content {
        Content {
            seo: complete_seo(),
            ..content(kind)
        }
    }

    #[tokio::test]
    async fn translates_the_fields_of_the_content_kind() {
        let mut store = MockContentStore::new();
        store
            .expect_fetch()
            .returning(|_| Ok(Some(with_seo(ContentKind::Product))));
        store
            .expect_save_translation()
            .withf(|subject, translation| {
                subject == "X"
                    && translation.locale == "fr"
                    && translation.kind == ContentKind::Product
                    && translation.fields["title"] == "Gadget"
            })
            .times(1)
            .returning(|_, _| Ok(true));
        let mut provider = MockEnrichmentProvider::new();
        provider
            .expect_translate()
            .withf(|fields, locale| {
                matches!(fields, TranslatableFields::Product { .. }) && locale == "fr"
            })
            .times(1)
            .returning(|_, _| Ok(BTreeMap::from([("title".to_owned(), "Gadget".to_owned())])));

        let job = job(store, provider);

        assert_eq!(job.execute(&arguments("fr")).await, Outcome::Success);
    }

    #[tokio::test]
    async fn incomplete_seo_waits_with_the_dependency_policy() {
        let mut store = MockContentStore::new();
        store
            .expect_fetch()
            .returning(|_| Ok(Some(content(ContentKind::Article))));
        let mut provider = MockEnrichmentProvider::new();
        provider.expect_translate().never();

        let job = job(store, provider);

        assert_eq!(
            job.execute(&arguments("de")).await,
            Outcome::recoverable("SEO data not yet available")
                .with_retry(RetryPolicy::linear(5, TimeDelta::seconds(10)))
        );
    }

    #[tokio::test]
    async fn subject_without_seo_is_requeued_five_times_then_abandoned() {
        let queue = InMemoryQueue::new().paused();
        let mut store = MockContentStore::new();
        store
            .expect_fetch()
            .times(6)
            .returning(|_| Ok(Some(content(ContentKind::Article))));
        store.expect_save_translation().never();
        let mut provider = MockEnrichmentProvider::new();
        provider.expect_translate().never();
        let job = job(store, provider)
            .with_seo_dependency(EnrichmentConfig::default().seo_dependency());
        let runner = runner(job, &queue);

        let mut delivery =
            deliver::<Translate>(&queue, JobArguments::new().with(SUBJECT_ID, "X")).await;
        assert_eq!(delivery.arguments.attempt(), 0);
        let mut delays = vec![];
        let final_ack = loop {
            match runner.execute_job(delivery).await {
                Ack::Requeued { delay, .. } => {
                    delays.push(delay.num_seconds());
                    delivery = queue.take_next(Translate::job_type()).unwrap();
                }
                ack => break ack,
            }
        };

        assert_eq!(delays, [10, 20, 30, 40, 50]);
        assert_eq!(final_ack, Ack::Abandoned { attempts: 6 });
        assert!(queue.pending(Translate::job_type()).is_empty());
    }

    #[tokio::test]
    async fn unsaved_translation_is_recoverable() {
        let mut store = MockContentStore::new();
        store
            .expect_fetch()
            .returning(|_| Ok(Some(with_seo(ContentKind::Page))));
        store
            .expect_save_translation()
            .returning(|_, _| Ok(false));
        let mut provider = MockEnrichmentProvider::new();
        provider
            .expect_translate()
            .returning(|_, _| Ok(BTreeMap::new()));

        let job = job(store, provider);

        assert_eq!(
            job.execute(&arguments("es")).await,
            Outcome::recoverable("translation to es was not saved")
        );
    }

    #[tokio::test]
    async fn message_without_locale_translates_every_configured_locale() {
        let mut store = MockContentStore::new();
        store
            .expect_fetch()
            .returning(|_| Ok(Some(with_seo(ContentKind::Article))));
        store
            .expect_save_translation()
            .withf(|_, translation| translation.kind == ContentKind::Article)
            .times(2)
            .returning(|_, translation| Ok(translation.locale == "fr"));
        let mut provider = MockEnrichmentProvider::new();
        provider
            .expect_translate()
            .withf(|_, locale| locale == "fr" || locale == "de")
            .times(2)
            .returning(|_, _| Ok(BTreeMap::new()));

        let outcome = job(store, provider)
            .execute(&JobArguments::new().with(SUBJECT_ID, "X"))
            .await;

        assert_eq!(
            outcome,
            Outcome::recoverable("translation to de was not saved")
        );
    }

    #[test]
    fn key_is_widened_only_by_a_locale() {
        let unscoped = Translate::idempotency_key(&JobArguments::new().with(SUBJECT_ID, "X"));

        assert_eq!(
            unscoped,
            Some(IdempotencyKey::new(Translate::job_type(), "X"))
        );
        assert_ne!(unscoped, Translate::idempotency_key(&arguments("fr")));
    }

    #[test]
    fn locales_have_distinct_idempotency_keys() {
        let french = Translate::idempotency_key(&arguments("fr")).unwrap();
        let german = Translate::idempotency_key(&arguments("de")).unwrap();

        assert_eq!(french.subject(), german.subject());
        assert_ne!(french, german);
        assert_eq!(
            french,
            Translate::idempotency_key(&arguments("fr").with_attempt(3)).unwrap()
        );
    }
}
