// src/config/crawler.rs
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

pub const DEFAULT_CRAWLER_CONFIG_PATH: &str = "config/crawler.toml";
pub const ENV_CRAWLER_CONFIG_PATH: &str = "CRAWLER_CONFIG_PATH";

pub const ENV_TIME_BUDGET_SECS: &str = "CRAWLER_TIME_BUDGET_SECS";
pub const ENV_FETCH_CONCURRENCY: &str = "CRAWLER_FETCH_CONCURRENCY";
pub const ENV_MIN_CONFIDENCE: &str = "CRAWLER_MIN_CONFIDENCE";
pub const ENV_CLASSIFIER_PROVIDER: &str = "CLASSIFIER_PROVIDER";

/// Upper bound on overlapping fetches, whatever the config says.
pub const MAX_FETCH_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub job: JobConfig,
    pub fetch: FetchConfig,
    pub classifier: ClassifierConfig,
    pub dedup: DedupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Hard wall-clock budget for one run.
    pub time_budget_secs: u64,
    /// 1 = strictly sequential.
    pub fetch_concurrency: usize,
    /// A run is still successful while failed/processed stays at or below this.
    pub max_failed_ratio: f32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            time_budget_secs: 300,
            fetch_concurrency: 1,
            max_failed_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub user_agent: String,
    /// Bodies above this are refused, not truncated.
    pub max_body_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            connect_timeout_secs: 5,
            max_retries: 2,
            backoff_ms: 500,
            user_agent: concat!("legal-news-crawler/", env!("CARGO_PKG_VERSION")).to_string(),
            max_body_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierProvider {
    #[default]
    Keywords,
    OpenAi,
}

impl ClassifierProvider {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keywords" | "keyword" | "rules" => Some(Self::Keywords),
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub provider: ClassifierProvider,
    /// Classifications below this confidence count as not relevant.
    pub min_confidence: f32,
    pub model: String,
    pub timeout_secs: u64,
    /// Rule file for the keyword classifier; embedded default when absent.
    pub rules_path: Option<PathBuf>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: ClassifierProvider::Keywords,
            min_confidence: 0.5,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 15,
            rules_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Minimum normalized Levenshtein similarity for a fuzzy title match.
    pub fuzzy_threshold: f64,
    /// Fuzzy matches only consider cases published within ± this many days.
    pub window_days: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.85,
            window_days: 30,
        }
    }
}

impl CrawlerConfig {
    /// Resolve path from env (or default), read it if present, then apply env overrides.
    /// A missing file is not an error: defaults apply.
    pub fn load() -> anyhow::Result<Self> {
        let path = env::var(ENV_CRAWLER_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CRAWLER_CONFIG_PATH));
        let mut cfg = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };
        cfg.apply_env();
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read crawler config at {}: {}", path.display(), e)
        })?;
        let mut cfg = Self::from_toml_str(&data)?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parse::<u64>(ENV_TIME_BUDGET_SECS) {
            self.job.time_budget_secs = v;
        }
        if let Some(v) = env_parse::<usize>(ENV_FETCH_CONCURRENCY) {
            self.job.fetch_concurrency = v;
        }
        if let Some(v) = env_parse::<f32>(ENV_MIN_CONFIDENCE) {
            self.classifier.min_confidence = v;
        }
        if let Ok(raw) = env::var(ENV_CLASSIFIER_PROVIDER) {
            match ClassifierProvider::parse(&raw) {
                Some(p) => self.classifier.provider = p,
                None => tracing::warn!(value = %raw, "ignoring unknown CLASSIFIER_PROVIDER"),
            }
        }
    }

    /// Clamp everything into ranges the job can honour.
    pub fn sanitize(&mut self) {
        if self.job.time_budget_secs == 0 {
            self.job.time_budget_secs = JobConfig::default().time_budget_secs;
        }
        self.job.fetch_concurrency = self.job.fetch_concurrency.clamp(1, MAX_FETCH_CONCURRENCY);
        if !self.job.max_failed_ratio.is_finite() {
            self.job.max_failed_ratio = JobConfig::default().max_failed_ratio;
        }
        self.job.max_failed_ratio = self.job.max_failed_ratio.clamp(0.0, 1.0);

        if self.fetch.timeout_secs == 0 {
            self.fetch.timeout_secs = FetchConfig::default().timeout_secs;
        }

        if !self.classifier.min_confidence.is_finite() {
            self.classifier.min_confidence = ClassifierConfig::default().min_confidence;
        }
        self.classifier.min_confidence = self.classifier.min_confidence.clamp(0.0, 1.0);

        if !(0.0..=1.0).contains(&self.dedup.fuzzy_threshold) {
            self.dedup.fuzzy_threshold = DedupConfig::default().fuzzy_threshold;
        }
        self.dedup.window_days = self.dedup.window_days.max(0);
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}
