// src/classify/keywords.rs
//! Rule-based relevance engine: weighted anchor categories, proximity checks, blockers.
//!
//! Config is TOML (see `config/relevance.toml`):
//! - `[weights]` per anchor category,
//! - `[[anchors]]` regexes with an optional `near = { pattern, window }` requirement,
//! - `[[blockers]]` regexes that zero the score unless `unless_near` holds.
//!
//! Confidence is `min(1, Σ weight(cat) × min(hits(cat), cap) / saturation)`.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use super::{Classification, Classifier};
use crate::error::CrawlError;
use crate::ingest::types::ArticleCandidate;

pub const DEFAULT_RELEVANCE_CONFIG_PATH: &str = "config/relevance.toml";
pub const ENV_RELEVANCE_CONFIG_PATH: &str = "RELEVANCE_CONFIG_PATH";

const EMBEDDED_RULES: &str = include_str!("../../config/relevance.toml");

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
pub struct RulesRoot {
    #[serde(default)]
    pub scoring: ScoringSection,
    pub weights: HashMap<String, u32>,
    #[serde(default)]
    pub anchors: Vec<AnchorCfg>,
    #[serde(default)]
    pub blockers: Vec<BlockerCfg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringSection {
    /// Raw weighted sum at which confidence saturates to 1.0.
    pub saturation: f32,
    /// Max hits counted per category.
    pub per_category_cap: usize,
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self {
            saturation: 6.0,
            per_category_cap: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnchorCfg {
    pub id: String,
    pub category: String,
    pub pattern: String,
    #[serde(default)]
    pub near: Option<NearCfg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockerCfg {
    pub id: String,
    pub pattern: String,
    pub reason: String,
    #[serde(default)]
    pub unless_near: Option<NearCfg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NearCfg {
    pub pattern: String,
    pub window: usize,
}

/* ----------------------------
Compiled engine
---------------------------- */

#[derive(Debug)]
struct CompiledAnchor {
    cfg: AnchorCfg,
    re: Regex,
    near: Option<(Regex, usize)>,
}

#[derive(Debug)]
struct CompiledBlocker {
    cfg: BlockerCfg,
    re: Regex,
    unless_near: Option<(Regex, usize)>,
}

#[derive(Debug)]
pub struct KeywordClassifier {
    pub rules: RulesRoot,
    anchors: Vec<CompiledAnchor>,
    blockers: Vec<CompiledBlocker>,
}

fn compile_near(owner: &str, near: &Option<NearCfg>) -> anyhow::Result<Option<(Regex, usize)>> {
    near.as_ref()
        .map(|nc| {
            Regex::new(&nc.pattern)
                .map(|re| (re, nc.window))
                .map_err(|e| anyhow::anyhow!("`{owner}` near-regex error: {e}"))
        })
        .transpose()
}

impl KeywordClassifier {
    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let rules: RulesRoot = toml::from_str(toml_str)?;
        if !(rules.scoring.saturation.is_finite() && rules.scoring.saturation > 0.0) {
            anyhow::bail!("scoring.saturation must be a positive number");
        }

        let anchors = rules
            .anchors
            .iter()
            .cloned()
            .map(|a| {
                let re = Regex::new(&a.pattern)
                    .map_err(|e| anyhow::anyhow!("anchor `{}` regex error: {}", a.id, e))?;
                let near = compile_near(&a.id, &a.near)?;
                Ok(CompiledAnchor { cfg: a, re, near })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let blockers = rules
            .blockers
            .iter()
            .cloned()
            .map(|b| {
                let re = Regex::new(&b.pattern)
                    .map_err(|e| anyhow::anyhow!("blocker `{}` regex error: {}", b.id, e))?;
                let unless_near = compile_near(&b.id, &b.unless_near)?;
                Ok(CompiledBlocker {
                    cfg: b,
                    re,
                    unless_near,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            anchors,
            blockers,
        })
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read relevance rules at {}: {}",
                path.display(),
                e
            )
        })?;
        Self::from_toml_str(&content)
    }

    /// RELEVANCE_CONFIG_PATH, else config/relevance.toml, else the embedded rules.
    pub fn from_default_location() -> anyhow::Result<Self> {
        if let Ok(p) = std::env::var(ENV_RELEVANCE_CONFIG_PATH) {
            return Self::from_path(&PathBuf::from(p));
        }
        let default = PathBuf::from(DEFAULT_RELEVANCE_CONFIG_PATH);
        if default.exists() {
            return Self::from_path(&default);
        }
        Self::embedded()
    }

    pub fn embedded() -> anyhow::Result<Self> {
        Self::from_toml_str(EMBEDDED_RULES)
    }

    /// Blocker ids whose pattern matches and whose `unless_near` exception does not hold.
    fn find_blockers(&self, text: &str, index: &TokenIndex) -> Vec<String> {
        let mut hits = Vec::new();
        for b in &self.blockers {
            let main = index.match_positions(&b.re, text);
            if main.is_empty() {
                continue;
            }
            if let Some((unless_re, win)) = &b.unless_near {
                let unless = index.match_positions(unless_re, text);
                if within_window(&main, &unless, *win) {
                    continue;
                }
            }
            hits.push(format!("blocker:{}:{}", b.cfg.id, b.cfg.reason));
        }
        hits
    }

    /// Anchor ids that qualify (pattern + optional proximity), and hits per category.
    fn collect_anchors(&self, text: &str, index: &TokenIndex) -> (Vec<String>, BTreeMap<String, usize>) {
        let mut matched = Vec::new();
        let mut per_cat: BTreeMap<String, usize> = BTreeMap::new();
        for a in &self.anchors {
            let main = index.match_positions(&a.re, text);
            if main.is_empty() {
                continue;
            }
            if let Some((near_re, win)) = &a.near {
                let near = index.match_positions(near_re, text);
                if !within_window(&main, &near, *win) {
                    continue;
                }
            }
            matched.push(a.cfg.id.clone());
            *per_cat.entry(a.cfg.category.clone()).or_insert(0) += 1;
        }
        (matched, per_cat)
    }

    /// Score `text`: blockers first, then anchors.
    pub fn score(&self, text: &str) -> Classification {
        let index = TokenIndex::new(text);

        let blockers = self.find_blockers(text, &index);
        if !blockers.is_empty() {
            return Classification {
                is_relevant: false,
                confidence: 0.0,
                reasons: blockers,
            };
        }

        let (matched, per_cat) = self.collect_anchors(text, &index);
        let cap = self.rules.scoring.per_category_cap.max(1);
        let raw: u32 = per_cat
            .iter()
            .map(|(cat, n)| self.rules.weights.get(cat).copied().unwrap_or(0) * (*n).min(cap) as u32)
            .sum();
        let confidence = (raw as f32 / self.rules.scoring.saturation).min(1.0);

        let mut reasons: Vec<String> = matched.into_iter().map(|id| format!("anchor:{id}")).collect();
        reasons.push(format!("raw:{raw}"));

        Classification {
            is_relevant: confidence > 0.0,
            confidence,
            reasons,
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, candidate: &ArticleCandidate) -> Result<Classification, CrawlError> {
        Ok(self.score(&candidate.text()))
    }

    fn name(&self) -> &'static str {
        "keywords"
    }
}

/* ----------------------------
Token proximity
---------------------------- */

/// Word-token start offsets; maps a byte offset to the index of the token it falls in.
struct TokenIndex {
    starts: Vec<usize>,
}

impl TokenIndex {
    fn new(text: &str) -> Self {
        static RE_WORD: once_cell::sync::OnceCell<Regex> = once_cell::sync::OnceCell::new();
        let re = RE_WORD.get_or_init(|| Regex::new(r"(?u)\b\w+\b").expect("tokenizer regex"));
        Self {
            starts: re.find_iter(text).map(|m| m.start()).collect(),
        }
    }

    fn token_at(&self, byte: usize) -> usize {
        match self.starts.binary_search(&byte) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        }
    }

    fn match_positions(&self, re: &Regex, text: &str) -> Vec<usize> {
        re.find_iter(text).map(|m| self.token_at(m.start())).collect()
    }
}

/// True if any `a` token is within `window` tokens of any `b` token.
fn within_window(a: &[usize], b: &[usize], window: usize) -> bool {
    a.iter().any(|&x| b.iter().any(|&y| x.abs_diff(y) <= window))
}
