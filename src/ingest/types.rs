// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CrawlError;

/// How a source's body should be read. `Auto` sniffs the document root.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Atom,
    Html,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub id: String, // stable key, e.g. "abajournal"
    #[serde(default)]
    pub name: String, // display name; defaults to the id
    pub url: String,  // feed endpoint or listing page
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// CSS selector for article links on HTML listing pages.
    #[serde(default)]
    pub item_selector: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Source {
    pub fn new(id: &str, url: &str, kind: SourceKind) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            url: url.to_string(),
            kind,
            enabled: true,
            item_selector: None,
        }
    }
}

/// Provisional article pulled out of one fetch; never persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleCandidate {
    pub source_id: String,
    pub url: String, // absolute
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub raw_excerpt: String,
}

impl ArticleCandidate {
    /// Title and excerpt joined; what classifiers and lawyer matching look at.
    pub fn text(&self) -> String {
        if self.raw_excerpt.is_empty() {
            self.title.clone()
        } else {
            format!("{}. {}", self.title, self.raw_excerpt)
        }
    }
}

/// Retrieves the raw body of a source.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<String, CrawlError>;
}
