// src/config/mod.rs
pub mod crawler;

pub use crawler::{
    ClassifierConfig, ClassifierProvider, CrawlerConfig, DedupConfig, FetchConfig, JobConfig,
    MAX_FETCH_CONCURRENCY,
};
