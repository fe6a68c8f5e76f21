// src/dedup.rs
//! Duplicate detection: map a candidate to an existing Case, if any.
//!
//! Exact URL match first, then the headline key, then a fuzzy title match.
//! Headline matches only count for cases published near the candidate;
//! a recycled headline years later is a different story.

use chrono::Duration;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use url::Url;

use crate::config::DedupConfig;
use crate::error::CrawlError;
use crate::ingest::types::ArticleCandidate;
use crate::store::{CaseId, CaseStore};

/// Query parameters that never identify an article.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "mc_cid", "mc_eid", "cmpid", "ref", "ref_src", "smid", "ocid",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub title_key: String,
    pub url_key: String,
}

impl Fingerprint {
    pub fn of(candidate: &ArticleCandidate) -> Self {
        Self {
            title_key: title_key(&candidate.title),
            url_key: canonical_url(&candidate.url),
        }
    }
}

fn stopwords() -> &'static HashSet<&'static str> {
    static S: OnceCell<HashSet<&'static str>> = OnceCell::new();
    S.get_or_init(|| {
        [
            "a", "an", "the", "of", "in", "on", "at", "to", "for", "by", "with", "from", "and",
            "or", "as", "is", "are", "was", "were", "be", "its", "it", "after", "over", "into",
            "new", "says", "said",
        ]
        .into_iter()
        .collect()
    })
}

/// Lower-case, punctuation to spaces, whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 (first 16 bytes, hex) over the content tokens in headline order.
/// Order matters: "Smith sues Jones" and "Jones sues Smith" are two cases.
pub fn title_key(title: &str) -> String {
    let norm = normalize_title(title);
    let tokens: Vec<&str> = norm
        .split(' ')
        .filter(|t| !t.is_empty() && !stopwords().contains(t))
        .collect();
    let material = if tokens.is_empty() {
        norm.clone()
    } else {
        tokens.join(" ")
    };
    let digest = Sha256::digest(material.as_bytes());
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Canonical form of an article URL used as the second fingerprint key.
pub fn canonical_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.trim().to_lowercase();
    };
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    let host = url
        .host_str()
        .unwrap_or_default()
        .trim_start_matches("www.")
        .to_string();
    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    let path = url.path().trim_end_matches('/');

    let mut out = format!("{}://{}{}{}", url.scheme(), host, port, path);
    if !pairs.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        out.push('?');
        out.push_str(&query);
    }
    out
}

#[derive(Debug, Clone)]
pub struct Deduplicator {
    fuzzy_threshold: f64,
    window: Duration,
}

impl Deduplicator {
    pub fn new(fuzzy_threshold: f64, window_days: i64) -> Self {
        Self {
            fuzzy_threshold: fuzzy_threshold.clamp(0.0, 1.0),
            window: Duration::days(window_days.max(0)),
        }
    }

    pub fn from_config(cfg: &DedupConfig) -> Self {
        Self::new(cfg.fuzzy_threshold, cfg.window_days)
    }

    pub async fn match_existing(
        &self,
        store: &dyn CaseStore,
        candidate: &ArticleCandidate,
    ) -> Result<Option<CaseId>, CrawlError> {
        let fp = Fingerprint::of(candidate);

        if let Some(c) = store.find_by_url_key(&fp.url_key).await? {
            return Ok(Some(c.id));
        }

        let from = candidate.published_at - self.window;
        let to = candidate.published_at + self.window;

        // Ordered by id, so the oldest in-window holder wins.
        let same_headline = store.find_by_title_key(&fp.title_key).await?;
        if let Some(c) = same_headline
            .iter()
            .find(|c| c.published_at >= from && c.published_at <= to)
        {
            return Ok(Some(c.id));
        }

        let nearby = store.cases_published_between(from, to).await?;

        let wanted = normalize_title(&candidate.title);
        let best = nearby
            .iter()
            .map(|c| {
                let score = strsim::normalized_levenshtein(&wanted, &normalize_title(&c.title));
                (score, c.id)
            })
            .filter(|(score, _)| *score >= self.fuzzy_threshold)
            .max_by(|a, b| a.0.total_cmp(&b.0).then_with(|| b.1.cmp(&a.1)));

        if let Some((score, id)) = best {
            tracing::debug!(
                target: "crawler",
                url = %candidate.url,
                case = %id,
                score,
                "fuzzy duplicate"
            );
        }
        Ok(best.map(|(_, id)| id))
    }
}
