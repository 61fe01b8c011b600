//! Runs the enrichment jobs against an in memory content store.
//!
//! Uses Postgres for the queue and the idempotency markers when `DATABASE_URL` is set, the in
//! memory implementations otherwise. Log output is controlled with `RUST_LOG`.
use std::{
    collections::{BTreeMap, HashMap},
    error::Error,
    str::FromStr,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use chrono::TimeDelta;
use rejob::{
    guard::{memory::InMemoryGuard, IdempotencyGuard},
    queue::{memory::InMemoryQueue, Queue},
    Rejob,
};
use rejob_enrichment::{
    config::EnrichmentConfig,
    content::{Content, ContentKind, SeoFields, TranslatableFields, Translation},
    producer::EnrichmentProducer,
    provider::{EnrichmentProvider, ProviderError},
    store::{ContentStore, StoreError},
};
use rejob_sqlx::{PgIdempotencyGuard, PgQueue};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

const DATABASE_URL: &str = "DATABASE_URL";

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EnrichmentConfig::from_env()?;

    match std::env::var(DATABASE_URL) {
        Ok(url) => {
            let pool = PgPoolOptions::new().connect(&url).await?;
            rejob_sqlx::migrate(&pool).await?;
            let queue = PgQueue::new(pool.clone()).await?;
            run(queue, PgIdempotencyGuard::from(pool), config).await
        }
        Err(_) => run(InMemoryQueue::new(), InMemoryGuard::new(), config).await,
    }
}

async fn run<Q, G>(queue: Q, guard: G, config: EnrichmentConfig) -> Result<(), Box<dyn Error>>
where
    Q: Queue,
    G: IdempotencyGuard,
{
    let store = Arc::new(DemoStore::default());
    let provider = Arc::new(DemoProvider);

    let rejob = rejob_enrichment::register(
        Rejob::new(queue.clone(), guard)
            .with_pruner(cron::Schedule::from_str("0 * * * * *")?, TimeDelta::days(7)),
        store.clone(),
        provider,
        &config,
    );

    let producer = EnrichmentProducer::new(queue, config.clone());
    for content in [
        Content {
            id: "1".to_owned(),
            kind: ContentKind::Article,
            title: "Growing tomatoes indoors".to_owned(),
            summary: Some("Light, soil and patience".to_owned()),
            body: "Tomatoes need six hours of light a day".to_owned(),
            seo: SeoFields::default(),
            tags: vec![],
        },
        Content {
            id: "2".to_owned(),
            kind: ContentKind::Product,
            title: "Ceramic planter".to_owned(),
            summary: None,
            body: "A glazed planter with a drainage hole".to_owned(),
            seo: SeoFields::default(),
            tags: vec![],
        },
    ] {
        store.insert(content.clone());
        let ids = producer.content_saved(&content).await?;
        tracing::info!("Enqueued {} jobs for {}", ids.len(), content.id);
    }

    let expected_translations = if config.translation_enabled {
        config.locales.len() * 2
    } else {
        0
    };
    for _ in 0..120 {
        if store.translation_count() >= expected_translations {
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    for content in store.contents() {
        tracing::info!(seo = ?content.seo, tags = ?content.tags, "Enriched {}", content.id);
    }
    tracing::info!("Stored {} translations", store.translation_count());

    rejob.graceful_shutdown().await?;
    Ok(())
}

#[derive(Default)]
struct DemoStore {
    contents: RwLock<HashMap<String, Content>>,
    translations: RwLock<Vec<(String, Translation)>>,
}

impl DemoStore {
    fn insert(&self, content: Content) {
        self.contents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(content.id.clone(), content);
    }

    fn contents(&self) -> Vec<Content> {
        self.contents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn translation_count(&self) -> usize {
        self.translations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn update(&self, subject_id: &str, update: impl FnOnce(&mut Content)) -> bool {
        self.contents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(subject_id)
            .map(update)
            .is_some()
    }
}

#[async_trait]
impl ContentStore for DemoStore {
    async fn fetch(&self, subject_id: &str) -> Result<Option<Content>, StoreError> {
        Ok(self
            .contents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject_id)
            .cloned())
    }

    async fn save_seo(&self, subject_id: &str, seo: &SeoFields) -> Result<bool, StoreError> {
        Ok(self.update(subject_id, |content| content.seo = seo.clone()))
    }

    async fn save_tags(&self, subject_id: &str, tags: &[String]) -> Result<bool, StoreError> {
        Ok(self.update(subject_id, |content| content.tags = tags.to_vec()))
    }

    async fn save_translation(
        &self,
        subject_id: &str,
        translation: &Translation,
    ) -> Result<bool, StoreError> {
        self.translations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((subject_id.to_owned(), translation.clone()));
        Ok(true)
    }
}

/// Derives everything from the content itself.
struct DemoProvider;

#[async_trait]
impl EnrichmentProvider for DemoProvider {
    async fn generate_seo(&self, content: &Content) -> Result<SeoFields, ProviderError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(SeoFields {
            meta_title: Some(format!("{} | Demo", content.title)),
            meta_description: Some(content.summary.clone().unwrap_or_else(|| content.body.clone())),
            keywords: words(&content.title).take(3).collect(),
        })
    }

    async fn generate_tags(
        &self,
        content: &Content,
        limit: usize,
    ) -> Result<Vec<String>, ProviderError> {
        Ok(words(&content.title)
            .chain(words(&content.body))
            .filter(|word| word.len() > 4)
            .take(limit)
            .collect())
    }

    async fn translate(
        &self,
        fields: &TranslatableFields,
        locale: &str,
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        Ok(fields
            .entries()
            .into_iter()
            .map(|(name, value)| (name.to_owned(), format!("[{locale}] {value}")))
            .collect())
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|word| !word.is_empty())
}
