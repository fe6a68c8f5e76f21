// src/error.rs
//! Error taxonomy for the crawler.
//!
//! `CrawlError` covers everything that can go wrong *inside* one source's
//! pipeline and ends up in `RunSummary::errors`. `JobError` is reserved for
//! failures before any source is touched; those surface as HTTP 500.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrawlError {
    #[error("fetch failed after {attempts} attempt(s): {message}")]
    Fetch { attempts: u32, message: String },

    #[error("unparseable source: {0}")]
    Parse(String),

    #[error("classification unavailable: {0}")]
    Classification(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("run time budget of {}s exceeded", .0.as_secs())]
    TimeoutExceeded(Duration),
}

impl CrawlError {
    /// Short machine-friendly label, used as a metrics/log field.
    pub fn kind(&self) -> &'static str {
        match self {
            CrawlError::Fetch { .. } => "fetch",
            CrawlError::Parse(_) => "parse",
            CrawlError::Classification(_) => "classification",
            CrawlError::Persistence(_) => "persistence",
            CrawlError::TimeoutExceeded(_) => "timeout",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for CrawlError {
    fn from(e: StoreError) -> Self {
        CrawlError::Persistence(e.to_string())
    }
}

/// Catastrophic, run-level failures. Nothing has been written when these occur.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("store unreachable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("failed to load lawyer directory: {0}")]
    Directory(#[source] StoreError),
}
