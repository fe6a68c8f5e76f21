// src/persist.rs
//! Persistence writer: turns an admitted candidate into one atomic
//! `CaseTransaction` (case create/update plus lawyer links).

use chrono::Utc;
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::dedup::Fingerprint;
use crate::error::CrawlError;
use crate::ingest::types::ArticleCandidate;
use crate::store::{CaseId, CaseStatus, CaseStore, CaseTransaction, CaseWrite, Lawyer, LawyerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub case_id: CaseId,
    pub created: bool,
    pub associations_created: u32,
}

/// Whole-word, case-insensitive full-name matcher over the lawyer directory.
/// Built once per run.
#[derive(Debug, Default)]
pub struct LawyerMatcher {
    patterns: Vec<(LawyerId, Regex)>,
}

impl LawyerMatcher {
    pub fn new(lawyers: &[Lawyer]) -> Self {
        let mut patterns = Vec::with_capacity(lawyers.len());
        for l in lawyers {
            let name = l.full_name.trim();
            let words: Vec<String> = name.split_whitespace().map(regex::escape).collect();
            if words.is_empty() {
                continue;
            }
            // `\b` next to punctuation ("Jr.") never matches; only anchor word chars.
            let edge = |c: Option<char>| match c {
                Some(c) if c.is_alphanumeric() || c == '_' => r"\b",
                _ => "",
            };
            let pat = format!(
                r"(?i){}{}{}",
                edge(name.chars().next()),
                words.join(r"\s+"),
                edge(name.chars().last())
            );
            match Regex::new(&pat) {
                Ok(re) => patterns.push((l.id, re)),
                Err(e) => tracing::warn!(
                    target: "crawler",
                    lawyer = %l.id,
                    error = %e,
                    "skipping lawyer with unusable name pattern"
                ),
            }
        }
        Self { patterns }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Matched lawyer ids, ascending, no repeats.
    pub fn find(&self, text: &str) -> Vec<LawyerId> {
        let mut ids: Vec<LawyerId> = self
            .patterns
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

fn status_rules() -> &'static [(CaseStatus, Regex)] {
    static RULES: OnceCell<Vec<(CaseStatus, Regex)>> = OnceCell::new();
    RULES.get_or_init(|| {
        // Most specific first; the first hit wins.
        [
            (CaseStatus::Dismissed, r"(?i)\b(dismiss(es|ed|al)?|thrown out|tossed)\b"),
            (CaseStatus::Settled, r"(?i)\b(settle(s|d|ment)?)\b"),
            (CaseStatus::Appealed, r"(?i)\b(appeal(s|ed|ing)?|appellate)\b"),
            (
                CaseStatus::Decided,
                r"(?i)\b(verdict|ruled|rules|ruling|convicted|acquitted|sentenced|judgment|found (guilty|liable))\b",
            ),
            (
                CaseStatus::Filed,
                r"(?i)\b(filed|files|sues|sued|charged|indicted|complaint)\b",
            ),
            (
                CaseStatus::Ongoing,
                r"(?i)\b(trial|hearing|testif(y|ies|ied)|deliberat(e|ions?)|jury selection)\b",
            ),
        ]
        .into_iter()
        .filter_map(|(status, pat)| Regex::new(pat).ok().map(|re| (status, re)))
        .collect()
    })
}

/// Status implied by the article text, if any.
pub fn infer_status(text: &str) -> Option<CaseStatus> {
    status_rules()
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(s, _)| *s)
}

pub struct PersistenceWriter<'a> {
    store: &'a dyn CaseStore,
    lawyers: &'a LawyerMatcher,
}

impl<'a> PersistenceWriter<'a> {
    pub fn new(store: &'a dyn CaseStore, lawyers: &'a LawyerMatcher) -> Self {
        Self { store, lawyers }
    }

    pub async fn upsert(
        &self,
        candidate: &ArticleCandidate,
        matched: Option<CaseId>,
    ) -> Result<UpsertOutcome, CrawlError> {
        let text = candidate.text();
        let status = infer_status(&text);

        let case = match matched {
            None => CaseWrite::Create {
                title: candidate.title.clone(),
                status: status.unwrap_or_default(),
                source_article_url: candidate.url.clone(),
                published_at: candidate.published_at,
                fingerprint: Fingerprint::of(candidate),
            },
            Some(id) => CaseWrite::Update { id, status },
        };

        let tx = CaseTransaction {
            case,
            lawyer_ids: self.lawyers.find(&text),
            at: Utc::now(),
        };

        let out = self.store.commit(tx).await?;
        tracing::debug!(
            target: "crawler",
            case = %out.case_id,
            created = out.created,
            links = out.associations_created,
            url = %candidate.url,
            "case written"
        );
        Ok(UpsertOutcome {
            case_id: out.case_id,
            created: out.created,
            associations_created: out.associations_created,
        })
    }
}
