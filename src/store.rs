// src/store.rs
//! Case store: the crawler's view of the directory database.
//!
//! The crawler only needs a handful of operations (lookup by fingerprint key,
//! a published-date window scan, the lawyer directory and one atomic commit
//! per candidate), so they sit behind [`CaseStore`]. [`MemoryStore`] is the
//! in-process implementation used by the service and by tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::dedup::Fingerprint;
use crate::error::StoreError;

pub const DEFAULT_LAWYERS_PATH: &str = "config/lawyers.json";
pub const ENV_LAWYERS_PATH: &str = "CRAWLER_LAWYERS_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LawyerId(pub u64);

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "case#{}", self.0)
    }
}

impl fmt::Display for LawyerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lawyer#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    #[default]
    Reported,
    Filed,
    Ongoing,
    Appealed,
    Decided,
    Settled,
    Dismissed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Reported => "reported",
            CaseStatus::Filed => "filed",
            CaseStatus::Ongoing => "ongoing",
            CaseStatus::Appealed => "appealed",
            CaseStatus::Decided => "decided",
            CaseStatus::Settled => "settled",
            CaseStatus::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub title: String,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_article_url: String,
    pub published_at: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lawyer {
    pub id: LawyerId,
    pub full_name: String,
    #[serde(default)]
    pub firm: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LawyerCaseAssociation {
    pub lawyer_id: LawyerId,
    pub case_id: CaseId,
    pub created_at: DateTime<Utc>,
}

/// The case half of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseWrite {
    Create {
        title: String,
        status: CaseStatus,
        source_article_url: String,
        published_at: DateTime<Utc>,
        fingerprint: Fingerprint,
    },
    /// `status: None` only bumps `updated_at`.
    Update { id: CaseId, status: Option<CaseStatus> },
}

/// Everything written for one candidate. Applied all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseTransaction {
    pub case: CaseWrite,
    /// Lawyers to link to the case; pairs that already exist are left alone.
    pub lawyer_ids: Vec<LawyerId>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    pub case_id: CaseId,
    pub created: bool,
    pub associations_created: u32,
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Cheap reachability check, run before any source is touched.
    async fn ping(&self) -> Result<(), StoreError>;
    /// Headline keys repeat across unrelated cases; all holders, by id.
    async fn find_by_title_key(&self, key: &str) -> Result<Vec<Case>, StoreError>;
    async fn find_by_url_key(&self, key: &str) -> Result<Option<Case>, StoreError>;
    /// Inclusive on both ends.
    async fn cases_published_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Case>, StoreError>;
    async fn lawyers(&self) -> Result<Vec<Lawyer>, StoreError>;
    async fn commit(&self, tx: CaseTransaction) -> Result<CommitOutcome, StoreError>;
}

pub type DynStore = Arc<dyn CaseStore>;

#[derive(Debug, Clone, Default)]
struct State {
    next_case_id: u64,
    cases: BTreeMap<CaseId, Case>,
    lawyers: BTreeMap<LawyerId, Lawyer>,
    associations: BTreeMap<(LawyerId, CaseId), DateTime<Utc>>,
}

impl State {
    fn apply(&mut self, tx: CaseTransaction) -> Result<CommitOutcome, StoreError> {
        let (case_id, created) = match tx.case {
            CaseWrite::Create {
                title,
                status,
                source_article_url,
                published_at,
                fingerprint,
            } => {
                if let Some(c) = self
                    .cases
                    .values()
                    .find(|c| c.fingerprint.url_key == fingerprint.url_key)
                {
                    return Err(StoreError::Conflict(format!(
                        "article url already owned by {}",
                        c.id
                    )));
                }
                self.next_case_id += 1;
                let id = CaseId(self.next_case_id);
                self.cases.insert(
                    id,
                    Case {
                        id,
                        title,
                        status,
                        created_at: tx.at,
                        updated_at: tx.at,
                        source_article_url,
                        published_at,
                        fingerprint,
                    },
                );
                (id, true)
            }
            CaseWrite::Update { id, status } => {
                let case = self
                    .cases
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
                if let Some(s) = status {
                    case.status = s;
                }
                case.updated_at = tx.at;
                (id, false)
            }
        };

        let mut seen = BTreeSet::new();
        let mut associations_created = 0u32;
        for lawyer_id in tx.lawyer_ids {
            if !seen.insert(lawyer_id) {
                return Err(StoreError::Conflict(format!(
                    "{lawyer_id} listed twice for {case_id}"
                )));
            }
            if !self.lawyers.contains_key(&lawyer_id) {
                return Err(StoreError::NotFound(lawyer_id.to_string()));
            }
            if self.associations.contains_key(&(lawyer_id, case_id)) {
                continue;
            }
            self.associations.insert((lawyer_id, case_id), tx.at);
            associations_created += 1;
        }

        Ok(CommitOutcome {
            case_id,
            created,
            associations_created,
        })
    }
}

/// In-process store. Commits work on a copy of the state and swap it in only
/// when every write succeeded, so a failed transaction leaves nothing behind.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<Arc<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lawyers(lawyers: Vec<Lawyer>) -> Self {
        let state = State {
            lawyers: lawyers.into_iter().map(|l| (l.id, l)).collect(),
            ..State::default()
        };
        Self {
            state: RwLock::new(Arc::new(state)),
        }
    }

    fn snapshot(&self) -> Result<Arc<State>, StoreError> {
        self.state
            .read()
            .map(|g| Arc::clone(&g))
            .map_err(|_| StoreError::Unavailable("state lock poisoned".into()))
    }

    /// All cases, ordered by id.
    pub fn cases(&self) -> Vec<Case> {
        self.snapshot()
            .map(|s| s.cases.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn associations(&self) -> Vec<LawyerCaseAssociation> {
        self.snapshot()
            .map(|s| {
                s.associations
                    .iter()
                    .map(|(&(lawyer_id, case_id), &created_at)| LawyerCaseAssociation {
                        lawyer_id,
                        case_id,
                        created_at,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl CaseStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.snapshot().map(|_| ())
    }

    async fn find_by_title_key(&self, key: &str) -> Result<Vec<Case>, StoreError> {
        let s = self.snapshot()?;
        Ok(s.cases
            .values()
            .filter(|c| c.fingerprint.title_key == key)
            .cloned()
            .collect())
    }

    async fn find_by_url_key(&self, key: &str) -> Result<Option<Case>, StoreError> {
        let s = self.snapshot()?;
        Ok(s.cases
            .values()
            .find(|c| c.fingerprint.url_key == key)
            .cloned())
    }

    async fn cases_published_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Case>, StoreError> {
        let s = self.snapshot()?;
        Ok(s.cases
            .values()
            .filter(|c| c.published_at >= from && c.published_at <= to)
            .cloned()
            .collect())
    }

    async fn lawyers(&self) -> Result<Vec<Lawyer>, StoreError> {
        Ok(self.snapshot()?.lawyers.values().cloned().collect())
    }

    async fn commit(&self, tx: CaseTransaction) -> Result<CommitOutcome, StoreError> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| StoreError::Unavailable("state lock poisoned".into()))?;
        let mut next = State::clone(&guard);
        let outcome = next.apply(tx)?;
        *guard = Arc::new(next);
        Ok(outcome)
    }
}

/// Load the lawyer directory seed (JSON array of `{id, full_name, firm?}`).
pub fn load_lawyers_from(path: &Path) -> Result<Vec<Lawyer>> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading lawyer directory {}", path.display()))?;
    let lawyers: Vec<Lawyer> = serde_json::from_str(&s)
        .with_context(|| format!("parsing lawyer directory {}", path.display()))?;
    Ok(lawyers)
}

/// `CRAWLER_LAWYERS_PATH` -> `config/lawyers.json` -> empty directory.
pub fn load_lawyers_default() -> Result<Vec<Lawyer>> {
    if let Ok(p) = std::env::var(ENV_LAWYERS_PATH) {
        return load_lawyers_from(&PathBuf::from(p));
    }
    let p = PathBuf::from(DEFAULT_LAWYERS_PATH);
    if p.exists() {
        return load_lawyers_from(&p);
    }
    tracing::warn!(
        target: "crawler",
        "no lawyer directory found; associations will never be created"
    );
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(t: &str, u: &str) -> Fingerprint {
        Fingerprint {
            title_key: t.into(),
            url_key: u.into(),
        }
    }

    fn create(t: &str, u: &str, lawyers: Vec<LawyerId>) -> CaseTransaction {
        CaseTransaction {
            case: CaseWrite::Create {
                title: format!("title {t}"),
                status: CaseStatus::Reported,
                source_article_url: format!("https://news.example/{u}"),
                published_at: Utc::now(),
                fingerprint: fp(t, u),
            },
            lawyer_ids: lawyers,
            at: Utc::now(),
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::with_lawyers(vec![
            Lawyer {
                id: LawyerId(1),
                full_name: "Ada Park".into(),
                firm: None,
            },
            Lawyer {
                id: LawyerId(2),
                full_name: "Ben Ortiz".into(),
                firm: Some("Ortiz LLP".into()),
            },
        ])
    }

    #[tokio::test]
    async fn create_then_lookup_by_either_key() {
        let s = store();
        let out = s.commit(create("t1", "u1", vec![LawyerId(1)])).await.unwrap();
        assert!(out.created);
        assert_eq!(out.associations_created, 1);
        assert_eq!(s.find_by_title_key("t1").await.unwrap()[0].id, out.case_id);
        assert_eq!(s.find_by_url_key("u1").await.unwrap().unwrap().id, out.case_id);
        assert!(s.find_by_title_key("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn article_url_is_unique() {
        let s = store();
        s.commit(create("t1", "u1", vec![])).await.unwrap();
        let err = s.commit(create("t2", "u1", vec![])).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(s.cases().len(), 1);
    }

    #[tokio::test]
    async fn generic_headline_may_name_several_cases() {
        let s = store();
        let a = s.commit(create("t1", "u1", vec![])).await.unwrap();
        let b = s.commit(create("t1", "u2", vec![])).await.unwrap();
        let ids: Vec<_> = s
            .find_by_title_key("t1")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![a.case_id, b.case_id]);
    }

    #[tokio::test]
    async fn existing_association_is_skipped() {
        let s = store();
        let first = s.commit(create("t1", "u1", vec![LawyerId(1)])).await.unwrap();
        let again = s
            .commit(CaseTransaction {
                case: CaseWrite::Update {
                    id: first.case_id,
                    status: Some(CaseStatus::Settled),
                },
                lawyer_ids: vec![LawyerId(1), LawyerId(2)],
                at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.associations_created, 1);
        assert_eq!(s.associations().len(), 2);
        assert_eq!(s.cases()[0].status, CaseStatus::Settled);
    }

    #[tokio::test]
    async fn failed_transaction_leaves_no_partial_writes() {
        let s = store();
        // Unknown lawyer: the case write must roll back too.
        let err = s
            .commit(create("t1", "u1", vec![LawyerId(1), LawyerId(99)]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(s.cases().is_empty());
        assert!(s.associations().is_empty());
    }

    #[tokio::test]
    async fn update_of_missing_case_is_not_found() {
        let s = store();
        let err = s
            .commit(CaseTransaction {
                case: CaseWrite::Update {
                    id: CaseId(42),
                    status: None,
                },
                lawyer_ids: vec![],
                at: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn lawyer_seed_parses() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("lawyers.json");
        std::fs::write(
            &p,
            r#"[{"id": 7, "full_name": "Carla Mendes", "firm": "Mendes & Co"}, {"id": 8, "full_name": "Dan Wu"}]"#,
        )
        .unwrap();
        let l = load_lawyers_from(&p).unwrap();
        assert_eq!(l.len(), 2);
        assert_eq!(l[0].id, LawyerId(7));
        assert_eq!(l[1].firm, None);
    }
}
