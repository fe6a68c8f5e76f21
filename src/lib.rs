// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod classify;
pub mod config;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod job;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod persist;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::error::{CrawlError, JobError, StoreError};
pub use crate::job::{run_news_crawler_job, CrawlJob, RunError, RunSummary, SourceOutcome};
pub use crate::notify::{ContactMessage, Notifier, NotifierMux};

use std::sync::Arc;

use crate::config::CrawlerConfig;
use crate::ingest::registry::load_sources_default;
use crate::store::{load_lawyers_default, DynStore, MemoryStore};

/// Build the job from on-disk configuration: crawler config, source registry
/// and the lawyer directory seed for the in-process store.
pub fn job_from_environment() -> anyhow::Result<CrawlJob> {
    use anyhow::Context;

    let cfg = CrawlerConfig::load().context("loading crawler config")?;
    let registry = load_sources_default().context("loading source registry")?;
    let lawyers = load_lawyers_default().context("loading lawyer directory")?;
    let store: DynStore = Arc::new(MemoryStore::with_lawyers(lawyers));
    CrawlJob::from_config(&cfg, registry, store)
}
