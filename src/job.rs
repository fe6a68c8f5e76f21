// src/job.rs
//! Run coordinator for the news crawler.
//!
//! One run walks the registry in order. Each source goes through
//! fetch -> extract -> classify -> dedup -> persist and comes back as a
//! [`SourceOutcome`]; outcomes are folded into a [`RunSummary`]. A source
//! failing never stops the run. Only pre-flight failures (store unreachable,
//! lawyer directory unreadable) are returned as [`JobError`].
//!
//! Fetches may run ahead of processing (`fetch_concurrency`) in spawned
//! tasks, but everything after the fetch is consumed strictly in
//! registration order, so store writes are serialised.

use chrono::Utc;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use url::Url;

use crate::classify::{RelevanceGate, Verdict};
use crate::config::{CrawlerConfig, JobConfig, MAX_FETCH_CONCURRENCY};
use crate::dedup::Deduplicator;
use crate::error::{CrawlError, JobError};
use crate::ingest::extract::{base_url, extract};
use crate::ingest::fetcher::HttpFetcher;
use crate::ingest::registry::SourceRegistry;
use crate::ingest::types::{ArticleCandidate, Fetcher, Source};
use crate::persist::{LawyerMatcher, PersistenceWriter};
use crate::store::DynStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub articles_found: u32,
    pub cases_created: u32,
    pub cases_updated: u32,
    pub associations_created: u32,
}

/// Per-source accumulator. Lives outside the pipeline future so that work
/// done before a timeout is still reported.
#[derive(Debug, Default)]
struct SourceAcc {
    stats: SourceStats,
    /// Per-candidate failures; the source itself keeps going.
    errors: Vec<CrawlError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Completed {
        source_id: String,
        stats: SourceStats,
        errors: Vec<CrawlError>,
    },
    Failed {
        source_id: String,
        stats: SourceStats,
        error: CrawlError,
        errors: Vec<CrawlError>,
    },
    /// Never attempted (run budget already spent).
    Skipped { source_id: String, reason: CrawlError },
}

impl SourceOutcome {
    pub fn source_id(&self) -> &str {
        match self {
            SourceOutcome::Completed { source_id, .. }
            | SourceOutcome::Failed { source_id, .. }
            | SourceOutcome::Skipped { source_id, .. } => source_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    pub source_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub success: bool,
    pub sources_processed: u32,
    pub articles_found: u32,
    pub cases_created: u32,
    pub cases_updated: u32,
    pub lawyer_associations_created: u32,
    /// Milliseconds.
    pub duration: u64,
    pub errors: Vec<RunError>,
}

/// Folds source outcomes; turned into a `RunSummary` once the run ends.
#[derive(Debug, Default)]
struct RunTally {
    processed: u32,
    failed: u32,
    timed_out: bool,
    totals: SourceStats,
    errors: Vec<RunError>,
}

impl RunTally {
    fn absorb(&mut self, outcome: SourceOutcome) {
        let push = |errors: &mut Vec<RunError>, id: &str, e: &CrawlError| {
            errors.push(RunError {
                source_id: id.to_string(),
                message: e.to_string(),
            })
        };
        match outcome {
            SourceOutcome::Completed {
                source_id,
                stats,
                errors,
            } => {
                self.processed += 1;
                self.add(stats);
                for e in &errors {
                    push(&mut self.errors, &source_id, e);
                }
            }
            SourceOutcome::Failed {
                source_id,
                stats,
                error,
                errors,
            } => {
                self.processed += 1;
                self.failed += 1;
                if matches!(error, CrawlError::TimeoutExceeded(_)) {
                    self.timed_out = true;
                }
                self.add(stats);
                for e in &errors {
                    push(&mut self.errors, &source_id, e);
                }
                push(&mut self.errors, &source_id, &error);
            }
            SourceOutcome::Skipped { source_id, reason } => {
                self.errors.push(RunError {
                    source_id,
                    message: format!("skipped: {reason}"),
                });
            }
        }
    }

    fn add(&mut self, s: SourceStats) {
        self.totals.articles_found += s.articles_found;
        self.totals.cases_created += s.cases_created;
        self.totals.cases_updated += s.cases_updated;
        self.totals.associations_created += s.associations_created;
    }

    fn finish(self, duration: Duration, max_failed_ratio: f32) -> RunSummary {
        let allowed = max_failed_ratio * self.processed as f32;
        RunSummary {
            success: !self.timed_out && (self.failed as f32) <= allowed,
            sources_processed: self.processed,
            articles_found: self.totals.articles_found,
            cases_created: self.totals.cases_created,
            cases_updated: self.totals.cases_updated,
            lawyer_associations_created: self.totals.associations_created,
            duration: duration.as_millis() as u64,
            errors: self.errors,
        }
    }
}

type Fetched = Result<(Url, String), CrawlError>;

async fn fetch_source(fetcher: Arc<dyn Fetcher>, source: Source) -> Fetched {
    let base = base_url(&source)?;
    let body = fetcher.fetch(&source).await?;
    Ok((base, body))
}

/// Fetches running ahead of processing, one spawned task per source.
///
/// At most `window` sources are fetched but not yet processed. Tasks run on
/// their own, so a slow processing step never stalls a fetch that is already
/// in flight. Handles are kept in registration order.
struct Prefetch<'a> {
    fetcher: Arc<dyn Fetcher>,
    sources: &'a [Source],
    window: usize,
    spawned: usize,
    pending: VecDeque<JoinHandle<Fetched>>,
}

impl<'a> Prefetch<'a> {
    fn new(fetcher: Arc<dyn Fetcher>, sources: &'a [Source], window: usize) -> Self {
        let mut p = Self {
            fetcher,
            sources,
            window: window.max(1),
            spawned: 0,
            pending: VecDeque::new(),
        };
        p.refill();
        p
    }

    /// Top up to `window` tasks. Called once the previous source is done,
    /// so with a window of 1 fetching is strictly sequential.
    fn refill(&mut self) {
        while self.pending.len() < self.window && self.spawned < self.sources.len() {
            let source = self.sources[self.spawned].clone();
            self.spawned += 1;
            self.pending
                .push_back(tokio::spawn(fetch_source(Arc::clone(&self.fetcher), source)));
        }
    }

    async fn next(&mut self) -> Option<Fetched> {
        let handle = self.pending.front_mut()?;
        let res = handle.await;
        self.pending.pop_front();
        Some(res.unwrap_or_else(|e| {
            Err(CrawlError::Fetch {
                attempts: 0,
                message: format!("fetch task failed: {e}"),
            })
        }))
    }

    fn cancel(&mut self) {
        for h in self.pending.drain(..) {
            h.abort();
        }
    }
}

impl Drop for Prefetch<'_> {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub struct CrawlJob {
    registry: SourceRegistry,
    fetcher: Arc<dyn Fetcher>,
    gate: RelevanceGate,
    dedup: Deduplicator,
    store: DynStore,
    time_budget: Duration,
    fetch_concurrency: usize,
    max_failed_ratio: f32,
}

impl CrawlJob {
    pub fn new(
        registry: SourceRegistry,
        fetcher: Arc<dyn Fetcher>,
        gate: RelevanceGate,
        dedup: Deduplicator,
        store: DynStore,
    ) -> Self {
        let mut job = Self {
            registry,
            fetcher,
            gate,
            dedup,
            store,
            time_budget: Duration::ZERO,
            fetch_concurrency: 1,
            max_failed_ratio: 0.0,
        };
        job.apply_job_config(&JobConfig::default());
        job
    }

    /// Production wiring: HTTP fetcher and configured classifier.
    pub fn from_config(
        cfg: &CrawlerConfig,
        registry: SourceRegistry,
        store: DynStore,
    ) -> anyhow::Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&cfg.fetch)?);
        let gate = RelevanceGate::from_config(&cfg.classifier)?;
        let dedup = Deduplicator::from_config(&cfg.dedup);
        Ok(Self::new(registry, fetcher, gate, dedup, store).with_job_config(&cfg.job))
    }

    pub fn with_job_config(mut self, cfg: &JobConfig) -> Self {
        self.apply_job_config(cfg);
        self
    }

    fn apply_job_config(&mut self, cfg: &JobConfig) {
        self.time_budget = Duration::from_secs(cfg.time_budget_secs.max(1));
        self.fetch_concurrency = cfg.fetch_concurrency.clamp(1, MAX_FETCH_CONCURRENCY);
        self.max_failed_ratio = cfg.max_failed_ratio.clamp(0.0, 1.0);
    }

    /// Override the budget with sub-second precision (tests).
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }

    pub fn sources(&self) -> &[Source] {
        self.registry.sources()
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub async fn run(&self) -> Result<RunSummary, JobError> {
        let started = Instant::now();
        let deadline = started + self.time_budget;

        self.store.ping().await.map_err(JobError::StoreUnavailable)?;
        let lawyers = self.store.lawyers().await.map_err(JobError::Directory)?;
        let matcher = LawyerMatcher::new(&lawyers);
        let writer = PersistenceWriter::new(self.store.as_ref(), &matcher);

        let sources = self.registry.sources();
        tracing::info!(
            target: "crawler",
            sources = sources.len(),
            lawyers = matcher.len(),
            classifier = self.gate.classifier_name(),
            concurrency = self.fetch_concurrency,
            budget_secs = self.time_budget.as_secs(),
            "crawl run started"
        );

        let mut tally = RunTally::default();
        let mut prefetch =
            Prefetch::new(Arc::clone(&self.fetcher), sources, self.fetch_concurrency);

        let mut next = 0;
        let mut out_of_time = false;
        while next < sources.len() {
            let source = &sources[next];
            if Instant::now() >= deadline {
                out_of_time = true;
                break;
            }
            next += 1;

            let fetched = match timeout_at(deadline, prefetch.next()).await {
                Ok(Some(r)) => r,
                Ok(None) => break,
                Err(_) => {
                    let outcome = SourceOutcome::Failed {
                        source_id: source.id.clone(),
                        stats: SourceStats::default(),
                        error: CrawlError::TimeoutExceeded(self.time_budget),
                        errors: Vec::new(),
                    };
                    self.log_outcome(&outcome);
                    tally.absorb(outcome);
                    out_of_time = true;
                    break;
                }
            };

            let outcome = match fetched {
                Err(error) => SourceOutcome::Failed {
                    source_id: source.id.clone(),
                    stats: SourceStats::default(),
                    error,
                    errors: Vec::new(),
                },
                Ok((base, body)) => {
                    let mut acc = SourceAcc::default();
                    let res = timeout_at(
                        deadline,
                        self.process(source, &base, &body, &writer, &mut acc),
                    )
                    .await;
                    match res {
                        Ok(()) => SourceOutcome::Completed {
                            source_id: source.id.clone(),
                            stats: acc.stats,
                            errors: acc.errors,
                        },
                        Err(_) => {
                            out_of_time = true;
                            SourceOutcome::Failed {
                                source_id: source.id.clone(),
                                stats: acc.stats,
                                error: CrawlError::TimeoutExceeded(self.time_budget),
                                errors: acc.errors,
                            }
                        }
                    }
                }
            };
            self.log_outcome(&outcome);
            tally.absorb(outcome);
            if out_of_time {
                break;
            }
            prefetch.refill();
        }
        prefetch.cancel();

        if out_of_time {
            tally.timed_out = true;
            for s in &sources[next..] {
                let outcome = SourceOutcome::Skipped {
                    source_id: s.id.clone(),
                    reason: CrawlError::TimeoutExceeded(self.time_budget),
                };
                self.log_outcome(&outcome);
                tally.absorb(outcome);
            }
        }

        let summary = tally.finish(started.elapsed(), self.max_failed_ratio);
        record_run_metrics(&summary);
        tracing::info!(
            target: "crawler",
            success = summary.success,
            processed = summary.sources_processed,
            articles = summary.articles_found,
            created = summary.cases_created,
            updated = summary.cases_updated,
            associations = summary.lawyer_associations_created,
            errors = summary.errors.len(),
            duration_ms = summary.duration,
            "crawl run finished"
        );
        Ok(summary)
    }

    async fn process(
        &self,
        source: &Source,
        base: &Url,
        body: &str,
        writer: &PersistenceWriter<'_>,
        acc: &mut SourceAcc,
    ) {
        let candidates = extract(source, base, body, Utc::now());
        acc.stats.articles_found = candidates.len() as u32;

        for cand in &candidates {
            if let Err(e) = self.process_candidate(cand, writer, acc).await {
                tracing::warn!(
                    target: "crawler",
                    source = %source.id,
                    url = %cand.url,
                    error = %e,
                    "candidate not persisted"
                );
                acc.errors.push(e);
            }
        }
    }

    async fn process_candidate(
        &self,
        cand: &ArticleCandidate,
        writer: &PersistenceWriter<'_>,
        acc: &mut SourceAcc,
    ) -> Result<(), CrawlError> {
        match self.gate.admit(cand).await {
            Verdict::Relevant(_) => {}
            Verdict::Rejected(_) | Verdict::Unavailable(_) => return Ok(()),
        }

        let matched = self.dedup.match_existing(self.store.as_ref(), cand).await?;
        let out = writer.upsert(cand, matched).await?;
        if out.created {
            acc.stats.cases_created += 1;
        } else {
            acc.stats.cases_updated += 1;
        }
        acc.stats.associations_created += out.associations_created;
        Ok(())
    }

    fn log_outcome(&self, outcome: &SourceOutcome) {
        match outcome {
            SourceOutcome::Completed {
                source_id,
                stats,
                errors,
            } => tracing::info!(
                target: "crawler",
                source = %source_id,
                articles = stats.articles_found,
                created = stats.cases_created,
                updated = stats.cases_updated,
                associations = stats.associations_created,
                candidate_errors = errors.len(),
                "source completed"
            ),
            SourceOutcome::Failed {
                source_id, error, ..
            } => {
                counter!("crawler_source_errors_total", "kind" => error.kind()).increment(1);
                tracing::warn!(
                    target: "crawler",
                    source = %source_id,
                    kind = error.kind(),
                    error = %error,
                    "source failed"
                );
            }
            SourceOutcome::Skipped { source_id, reason } => tracing::warn!(
                target: "crawler",
                source = %source_id,
                reason = %reason,
                "source skipped"
            ),
        }
    }
}

fn record_run_metrics(s: &RunSummary) {
    let outcome = if s.success { "success" } else { "failure" };
    counter!("crawler_runs_total", "outcome" => outcome).increment(1);
    counter!("crawler_articles_found_total").increment(s.articles_found as u64);
    counter!("crawler_cases_created_total").increment(s.cases_created as u64);
    counter!("crawler_cases_updated_total").increment(s.cases_updated as u64);
    counter!("crawler_associations_created_total").increment(s.lawyer_associations_created as u64);
    histogram!("crawler_run_ms").record(s.duration as f64);
}

/// Entry point used by the HTTP trigger and the CLI.
pub async fn run_news_crawler_job(job: &CrawlJob) -> Result<RunSummary, JobError> {
    job.run().await
}
