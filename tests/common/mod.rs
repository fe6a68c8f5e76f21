// tests/common/mod.rs
// Deterministic fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use legal_news_crawler::classify::{Classification, Classifier, RelevanceGate};
use legal_news_crawler::config::JobConfig;
use legal_news_crawler::dedup::Deduplicator;
use legal_news_crawler::error::{CrawlError, StoreError};
use legal_news_crawler::ingest::registry::SourceRegistry;
use legal_news_crawler::ingest::types::{ArticleCandidate, Fetcher, Source, SourceKind};
use legal_news_crawler::store::{
    Case, CaseStore, CaseTransaction, CaseWrite, CommitOutcome, DynStore, Lawyer, LawyerId,
    MemoryStore,
};
use legal_news_crawler::CrawlJob;

/// One scripted reply for a source.
#[derive(Clone)]
pub enum Reply {
    Body(String),
    Fail(CrawlError),
    /// Sleep (tokio time), then return the body.
    Slow(Duration, String),
    /// `n` sleeps of the given length; each one only starts once the
    /// previous finished, so the fetch needs to be driven to make progress.
    Steps(u32, Duration, String),
}

/// Fetcher answering from a script keyed by source id.
#[derive(Default)]
pub struct ScriptedFetcher {
    replies: HashMap<String, Reply>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, source_id: &str, r: Reply) -> Self {
        self.replies.insert(source_id.to_string(), r);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, source: &Source) -> Result<String, CrawlError> {
        self.calls.lock().unwrap().push(source.id.clone());
        match self.replies.get(&source.id) {
            Some(Reply::Body(b)) => Ok(b.clone()),
            Some(Reply::Fail(e)) => Err(e.clone()),
            Some(Reply::Slow(d, b)) => {
                tokio::time::sleep(*d).await;
                Ok(b.clone())
            }
            Some(Reply::Steps(n, d, b)) => {
                for _ in 0..*n {
                    tokio::time::sleep(*d).await;
                }
                Ok(b.clone())
            }
            None => Err(CrawlError::Fetch {
                attempts: 1,
                message: format!("no script for {}", source.id),
            }),
        }
    }
}

/// Relevant (0.9) when the text mentions a court, lawsuit or verdict.
pub struct LegalWordsClassifier;

#[async_trait]
impl Classifier for LegalWordsClassifier {
    async fn classify(&self, c: &ArticleCandidate) -> Result<Classification, CrawlError> {
        let t = c.text().to_lowercase();
        let hit = ["court", "lawsuit", "verdict", "sued"]
            .iter()
            .any(|w| t.contains(w));
        Ok(Classification {
            is_relevant: hit,
            confidence: if hit { 0.9 } else { 0.1 },
            reasons: vec![],
        })
    }
    fn name(&self) -> &'static str {
        "legal-words"
    }
}

/// `LegalWordsClassifier` that takes `delay` to answer for titles with "slow".
pub struct SlowClassifier {
    pub delay: Duration,
}

#[async_trait]
impl Classifier for SlowClassifier {
    async fn classify(&self, c: &ArticleCandidate) -> Result<Classification, CrawlError> {
        if c.title.to_lowercase().contains("slow") {
            tokio::time::sleep(self.delay).await;
        }
        LegalWordsClassifier.classify(c).await
    }
    fn name(&self) -> &'static str {
        "slow-legal-words"
    }
}

/// Always errors, like an unreachable remote service.
pub struct DownClassifier {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Classifier for DownClassifier {
    async fn classify(&self, _c: &ArticleCandidate) -> Result<Classification, CrawlError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CrawlError::Classification("connection refused".into()))
    }
    fn name(&self) -> &'static str {
        "down"
    }
}

/// Wraps a MemoryStore; commits whose case title contains `poison` fail,
/// `offline` makes ping fail, `extra_lawyers` are advertised by `lawyers()`
/// without existing in the inner store.
pub struct FaultyStore {
    pub inner: Arc<MemoryStore>,
    pub poison: Option<String>,
    pub offline: bool,
    pub extra_lawyers: Vec<Lawyer>,
}

impl FaultyStore {
    pub fn wrap(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            poison: None,
            offline: false,
            extra_lawyers: vec![],
        }
    }
}

#[async_trait]
impl CaseStore for FaultyStore {
    async fn ping(&self) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.ping().await
    }
    async fn find_by_title_key(&self, key: &str) -> Result<Vec<Case>, StoreError> {
        self.inner.find_by_title_key(key).await
    }
    async fn find_by_url_key(&self, key: &str) -> Result<Option<Case>, StoreError> {
        self.inner.find_by_url_key(key).await
    }
    async fn cases_published_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Case>, StoreError> {
        self.inner.cases_published_between(from, to).await
    }
    async fn lawyers(&self) -> Result<Vec<Lawyer>, StoreError> {
        let mut l = self.inner.lawyers().await?;
        l.extend(self.extra_lawyers.iter().cloned());
        Ok(l)
    }
    async fn commit(&self, tx: CaseTransaction) -> Result<CommitOutcome, StoreError> {
        if let (Some(p), CaseWrite::Create { title, .. }) = (&self.poison, &tx.case) {
            if title.contains(p.as_str()) {
                return Err(StoreError::Unavailable("write timeout".into()));
            }
        }
        self.inner.commit(tx).await
    }
}

pub fn lawyers() -> Vec<Lawyer> {
    vec![
        Lawyer {
            id: LawyerId(1),
            full_name: "Maria Lopez".into(),
            firm: Some("Lopez & Hart LLP".into()),
        },
        Lawyer {
            id: LawyerId(2),
            full_name: "David Okafor".into(),
            firm: None,
        },
    ]
}

pub fn rss_source(id: &str) -> Source {
    Source::new(id, &format!("https://{id}.example/feed"), SourceKind::Rss)
}

pub fn registry(ids: &[&str]) -> SourceRegistry {
    SourceRegistry::new(ids.iter().map(|id| rss_source(id)).collect()).unwrap()
}

/// `(title, link, description)` items, all dated 3 March 2025.
pub fn rss(items: &[(&str, &str, &str)]) -> String {
    let mut s = String::from(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title>"#);
    for (title, link, desc) in items {
        s.push_str(&format!(
            "<item><title>{title}</title><link>{link}</link>\
             <pubDate>Mon, 03 Mar 2025 09:00:00 GMT</pubDate>\
             <description>{desc}</description></item>"
        ));
    }
    s.push_str("</channel></rss>");
    s
}

pub fn gate(c: impl Classifier + 'static) -> RelevanceGate {
    RelevanceGate::new(Arc::new(c), 0.5, Duration::from_secs(5))
}

pub fn job(
    registry: SourceRegistry,
    fetcher: Arc<dyn Fetcher>,
    gate: RelevanceGate,
    store: DynStore,
) -> CrawlJob {
    CrawlJob::new(registry, fetcher, gate, Deduplicator::new(0.85, 30), store)
        .with_job_config(&JobConfig::default())
}
