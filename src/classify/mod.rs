// src/classify/mod.rs
//! Relevance classification: does this article concern a legal case or lawyer?
//!
//! Classifiers sit behind the [`Classifier`] trait so the job can swap the
//! rule-based engine, a remote model, or a test fake. Policy lives in
//! [`RelevanceGate`]: a classifier failure or a low-confidence answer both
//! mean "not relevant" (fail-closed).

pub mod keywords;
pub mod openai;

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ClassifierConfig, ClassifierProvider};
use crate::error::CrawlError;
use crate::ingest::types::ArticleCandidate;

pub use keywords::KeywordClassifier;
pub use openai::OpenAiClassifier;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub is_relevant: bool,
    /// 0.0 ..= 1.0
    pub confidence: f32,
    pub reasons: Vec<String>,
}

impl Classification {
    pub fn not_relevant(reason: impl Into<String>) -> Self {
        Self {
            is_relevant: false,
            confidence: 0.0,
            reasons: vec![reason.into()],
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, candidate: &ArticleCandidate) -> Result<Classification, CrawlError>;
    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;
}

pub type DynClassifier = Arc<dyn Classifier>;

/// What the gate decided for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Relevant(Classification),
    Rejected(Classification),
    /// Classifier failed; treated as not relevant.
    Unavailable(CrawlError),
}

impl Verdict {
    pub fn is_relevant(&self) -> bool {
        matches!(self, Verdict::Relevant(_))
    }
}

#[derive(Clone)]
pub struct RelevanceGate {
    classifier: DynClassifier,
    min_confidence: f32,
    timeout: Duration,
}

impl RelevanceGate {
    pub fn new(classifier: DynClassifier, min_confidence: f32, timeout: Duration) -> Self {
        Self {
            classifier,
            min_confidence: min_confidence.clamp(0.0, 1.0),
            timeout,
        }
    }

    pub fn from_config(cfg: &ClassifierConfig) -> anyhow::Result<Self> {
        let classifier = build_classifier(cfg)?;
        Ok(Self::new(
            classifier,
            cfg.min_confidence,
            Duration::from_secs(cfg.timeout_secs.max(1)),
        ))
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    /// Fail-closed admission: errors, timeouts and low confidence all reject.
    pub async fn admit(&self, candidate: &ArticleCandidate) -> Verdict {
        let res = tokio::time::timeout(self.timeout, self.classifier.classify(candidate)).await;
        let classification = match res {
            Ok(Ok(c)) => c,
            Ok(Err(e)) => return self.unavailable(candidate, e),
            Err(_) => {
                let e = CrawlError::Classification(format!(
                    "{} timed out after {}s",
                    self.classifier.name(),
                    self.timeout.as_secs()
                ));
                return self.unavailable(candidate, e);
            }
        };

        if classification.is_relevant && classification.confidence >= self.min_confidence {
            Verdict::Relevant(classification)
        } else {
            tracing::debug!(
                target: "crawler",
                url = %candidate.url,
                confidence = classification.confidence,
                min = self.min_confidence,
                "candidate rejected as not relevant"
            );
            Verdict::Rejected(classification)
        }
    }

    fn unavailable(&self, candidate: &ArticleCandidate, e: CrawlError) -> Verdict {
        tracing::warn!(
            target: "crawler",
            classifier = self.classifier.name(),
            url = %candidate.url,
            error = %e,
            "classifier unavailable, dropping candidate"
        );
        counter!("crawler_classifier_errors_total").increment(1);
        Verdict::Unavailable(e)
    }
}

/// Factory: build the configured classifier.
pub fn build_classifier(cfg: &ClassifierConfig) -> anyhow::Result<DynClassifier> {
    match cfg.provider {
        ClassifierProvider::Keywords => {
            let engine = match &cfg.rules_path {
                Some(p) => KeywordClassifier::from_path(p)?,
                None => KeywordClassifier::from_default_location()?,
            };
            Ok(Arc::new(engine))
        }
        ClassifierProvider::OpenAi => Ok(Arc::new(OpenAiClassifier::from_env(cfg)?)),
    }
}
