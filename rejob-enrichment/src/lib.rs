//! Content enrichment jobs built on [`rejob`].
//!
//! Three jobs are provided:
//!
//! - `seo-update` generates the meta title, description and keywords of a subject,
//! - `tag-update` generates its tags,
//! - `translate` translates it into the locale named by the message, or every configured locale,
//!   waiting until the SEO data exists.
//!
//! The content store and the enrichment provider are injected when the jobs are built, so the
//! jobs run unchanged against a database, an HTTP API, or the mocks used in tests.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use rejob::{guard::memory::InMemoryGuard, queue::memory::InMemoryQueue, Rejob};
//! # use rejob_enrichment::{config::EnrichmentConfig, provider::EnrichmentProvider, store::ContentStore};
//! # async fn run(store: Arc<dyn ContentStore>, provider: Arc<dyn EnrichmentProvider>) {
//! let config = EnrichmentConfig::from_env().unwrap();
//! let rejob = rejob_enrichment::register(
//!     Rejob::new(InMemoryQueue::new(), InMemoryGuard::new()),
//!     store,
//!     provider,
//!     &config,
//! );
//!
//! rejob.graceful_shutdown().await.unwrap();
//! # }
//! ```
use std::sync::Arc;

use rejob::{guard::IdempotencyGuard, queue::Queue, Rejob};

use crate::{
    config::EnrichmentConfig,
    jobs::{seo::SeoUpdate, tags::TagUpdate, translate::Translate},
    provider::EnrichmentProvider,
    store::ContentStore,
};

pub mod config;
pub mod content;
pub mod jobs;
pub mod producer;
pub mod provider;
pub mod store;

/// Start workers for every enrichment job enabled in `config`.
pub fn register<Q, G>(
    mut rejob: Rejob<Q, G>,
    store: Arc<dyn ContentStore>,
    provider: Arc<dyn EnrichmentProvider>,
    config: &EnrichmentConfig,
) -> Rejob<Q, G>
where
    Q: Queue,
    G: IdempotencyGuard,
{
    if config.seo_enabled {
        rejob = rejob.with_job(SeoUpdate::new(store.clone(), provider.clone()));
    }
    if config.tags_enabled {
        rejob = rejob.with_job(TagUpdate::new(
            store.clone(),
            provider.clone(),
            config.max_tags,
        ));
    }
    if config.translation_enabled {
        rejob = rejob.with_job(
            Translate::new(store, provider, config.locales.clone())
                .with_seo_dependency(config.seo_dependency()),
        );
    }
    rejob
}
