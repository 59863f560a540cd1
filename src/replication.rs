//! Canonical + mirror replication of the event log.
//!
//! There is no transaction across stores. The canonical store is written
//! first and its failure is a hard error; mirrors are best-effort and every
//! sink reports its own outcome.

use serde::Serialize;
use std::path::PathBuf;

use crate::error::StoreResult;
use crate::journal::{LineMatch, LogEntry, LogFile};
use crate::model::EventRecord;

pub const CANONICAL: &str = "canonical";
pub const MIRROR: &str = "mirror";

/// Role of a store in the replication policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreRole {
    Canonical,
    Mirror,
}

/// One physical store with its label.
#[derive(Debug, Clone)]
pub struct LogStore {
    pub label: String,
    pub role: StoreRole,
    pub file: LogFile,
}

/// Result of appending to one sink.
#[derive(Debug, Clone, Serialize)]
pub struct SinkResult {
    pub store: String,
    pub role: StoreRole,
    /// `None` on success.
    pub error: Option<String>,
}

impl SinkResult {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-sink outcome of an append.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteReport {
    pub sinks: Vec<SinkResult>,
}

impl WriteReport {
    pub fn succeeded(&self, store: &str) -> bool {
        self.sinks.iter().any(|s| s.store == store && s.ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &SinkResult> {
        self.sinks.iter().filter(|s| !s.ok())
    }
}

/// What happened to one store during a rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RewriteOutcome {
    Replaced { matched: LineMatch },
    NotFound,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreRewrite {
    pub store: String,
    pub role: StoreRole,
    pub outcome: RewriteOutcome,
}

/// Per-store outcome of a rewrite. Zero replacements is not an error.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RewriteReport {
    pub stores: Vec<StoreRewrite>,
}

impl RewriteReport {
    pub fn replaced_in(&self, store: &str) -> bool {
        self.stores
            .iter()
            .any(|s| s.store == store && matches!(s.outcome, RewriteOutcome::Replaced { .. }))
    }

    pub fn canonical_replaced(&self) -> bool {
        self.replaced_role(StoreRole::Canonical)
    }

    pub fn mirror_replaced(&self) -> bool {
        self.replaced_role(StoreRole::Mirror)
    }

    pub fn replaced_any(&self) -> bool {
        self.stores
            .iter()
            .any(|s| matches!(s.outcome, RewriteOutcome::Replaced { .. }))
    }

    fn replaced_role(&self, role: StoreRole) -> bool {
        self.stores
            .iter()
            .any(|s| s.role == role && matches!(s.outcome, RewriteOutcome::Replaced { .. }))
    }

    /// Fold another report in, keeping one row per store. A replacement in
    /// either report wins over not-found; failures are kept.
    pub fn merge(&mut self, other: RewriteReport) {
        for incoming in other.stores {
            match self.stores.iter_mut().find(|s| s.store == incoming.store) {
                Some(existing) => {
                    if matches!(existing.outcome, RewriteOutcome::NotFound) {
                        existing.outcome = incoming.outcome;
                    }
                }
                None => self.stores.push(incoming),
            }
        }
    }
}

/// Per-store record counts touched by a rename.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenameReport {
    pub stores: Vec<(String, usize)>,
}

impl RenameReport {
    pub fn total(&self) -> usize {
        self.stores.iter().map(|(_, n)| n).sum()
    }
}

/// The logical event log: one canonical store plus any number of mirrors.
#[derive(Debug, Clone)]
pub struct ReplicatedLog {
    stores: Vec<LogStore>,
}

impl ReplicatedLog {
    pub fn new(canonical: impl Into<PathBuf>, mirrors: Vec<PathBuf>) -> Self {
        let mut stores = vec![LogStore {
            label: CANONICAL.to_string(),
            role: StoreRole::Canonical,
            file: LogFile::new(canonical),
        }];
        for (i, path) in mirrors.into_iter().enumerate() {
            let label = if i == 0 {
                MIRROR.to_string()
            } else {
                format!("{MIRROR}-{}", i + 1)
            };
            stores.push(LogStore {
                label,
                role: StoreRole::Mirror,
                file: LogFile::new(path),
            });
        }
        Self { stores }
    }

    pub fn stores(&self) -> &[LogStore] {
        &self.stores
    }

    pub fn canonical(&self) -> &LogStore {
        &self.stores[0]
    }

    pub fn store(&self, label: &str) -> Option<&LogStore> {
        self.stores.iter().find(|s| s.label == label)
    }

    /// Append to the canonical store, then to each mirror.
    ///
    /// A canonical failure is returned as an error before any mirror is
    /// touched. Mirror failures are reported, never rolled back.
    pub fn append(&self, record: &EventRecord) -> StoreResult<WriteReport> {
        let canonical = self.canonical();
        canonical.file.append(record)?;
        let mut report = WriteReport {
            sinks: vec![SinkResult {
                store: canonical.label.clone(),
                role: canonical.role,
                error: None,
            }],
        };
        for mirror in &self.stores[1..] {
            let error = match mirror.file.append(record) {
                Ok(()) => None,
                Err(err) => {
                    tracing::warn!(store = %mirror.label, error = %err, "mirror append failed");
                    Some(err.to_string())
                }
            };
            report.sinks.push(SinkResult {
                store: mirror.label.clone(),
                role: mirror.role,
                error,
            });
        }
        tracing::debug!(event = %record.event, job = %record.job, ts = record.timestamp, "appended");
        Ok(report)
    }

    /// Every line of every store, canonical first, in file order.
    ///
    /// An unreadable mirror is skipped with a warning; an unreadable
    /// canonical store is an error.
    pub fn read_all(&self) -> StoreResult<Vec<LogEntry>> {
        let mut entries = self.canonical().file.read_entries(CANONICAL)?;
        for mirror in &self.stores[1..] {
            match mirror.file.read_entries(&mirror.label) {
                Ok(mut more) => entries.append(&mut more),
                Err(err) => {
                    tracing::warn!(store = %mirror.label, error = %err, "skipping unreadable mirror")
                }
            }
        }
        Ok(entries)
    }

    /// Entries of the canonical store only.
    pub fn read_canonical(&self) -> StoreResult<Vec<LogEntry>> {
        self.canonical().file.read_entries(CANONICAL)
    }

    /// Rewrite the matching line in every store.
    pub fn rewrite_line(&self, original_raw: &str, new_record: &EventRecord) -> RewriteReport {
        let stores = self
            .stores
            .iter()
            .map(|store| rewrite_store(store, original_raw, new_record))
            .collect();
        RewriteReport { stores }
    }

    /// Rewrite the matching line in the store labelled `label` only.
    pub fn rewrite_in(
        &self,
        label: &str,
        original_raw: &str,
        new_record: &EventRecord,
    ) -> RewriteReport {
        let stores = self
            .stores
            .iter()
            .filter(|s| s.label == label)
            .map(|store| rewrite_store(store, original_raw, new_record))
            .collect();
        RewriteReport { stores }
    }

    /// Rename a job in every store. Canonical errors propagate; mirror
    /// errors are logged and counted as zero.
    pub fn rename_job(&self, old: &str, new: &str) -> StoreResult<RenameReport> {
        let mut report = RenameReport::default();
        let canonical = self.canonical();
        report
            .stores
            .push((canonical.label.clone(), canonical.file.rename_job(old, new)?));
        for mirror in &self.stores[1..] {
            let changed = mirror.file.rename_job(old, new).unwrap_or_else(|err| {
                tracing::warn!(store = %mirror.label, error = %err, "mirror rename failed");
                0
            });
            report.stores.push((mirror.label.clone(), changed));
        }
        Ok(report)
    }
}

fn rewrite_store(store: &LogStore, original_raw: &str, new_record: &EventRecord) -> StoreRewrite {
    let outcome = match store.file.rewrite_line(original_raw, new_record) {
        Ok(Some(matched)) => RewriteOutcome::Replaced { matched },
        Ok(None) => RewriteOutcome::NotFound,
        Err(err) => {
            tracing::warn!(store = %store.label, error = %err, "rewrite failed");
            RewriteOutcome::Failed {
                error: err.to_string(),
            }
        }
    };
    StoreRewrite {
        store: store.label.clone(),
        role: store.role,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dual(dir: &std::path::Path) -> ReplicatedLog {
        ReplicatedLog::new(
            dir.join("global/logs.jsonl"),
            vec![dir.join("ws/.timescope/logs.jsonl")],
        )
    }

    #[test]
    fn append_writes_canonical_then_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let log = dual(dir.path());
        let report = log.append(&EventRecord::start("a", 1)).unwrap();

        assert!(report.succeeded(CANONICAL));
        assert!(report.succeeded(MIRROR));
        assert_eq!(report.failures().count(), 0);

        let entries = log.read_all().unwrap();
        let stores: Vec<&str> = entries.iter().map(|e| e.store.as_str()).collect();
        assert_eq!(stores, vec![CANONICAL, MIRROR]);
    }

    #[test]
    fn mirror_failure_keeps_canonical_write() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the mirror directory should be.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "").unwrap();
        let log = ReplicatedLog::new(
            dir.path().join("logs.jsonl"),
            vec![blocker.join("logs.jsonl")],
        );

        let report = log.append(&EventRecord::start("a", 1)).unwrap();
        assert!(report.succeeded(CANONICAL));
        assert!(!report.succeeded(MIRROR));
        assert_eq!(log.read_canonical().unwrap().len(), 1);
    }

    #[test]
    fn rewrite_reports_per_store() {
        let dir = tempfile::tempdir().unwrap();
        let log = dual(dir.path());
        let only_canonical = EventRecord::start("a", 1);
        log.canonical().file.append(&only_canonical).unwrap();
        log.append(&EventRecord::stop("a", 2, None)).unwrap();

        let report = log.rewrite_line(&only_canonical.to_line(), &EventRecord::start("a", 0));
        assert!(report.canonical_replaced());
        assert!(!report.mirror_replaced());
        assert_eq!(report.stores[1].outcome, RewriteOutcome::NotFound);
    }

    #[test]
    fn rewrite_in_targets_one_store() {
        let dir = tempfile::tempdir().unwrap();
        let log = dual(dir.path());
        let record = EventRecord::start("a", 1);
        log.append(&record).unwrap();

        let report = log.rewrite_in(MIRROR, &record.to_line(), &EventRecord::start("a", 2));
        assert_eq!(report.stores.len(), 1);
        assert!(report.mirror_replaced());
        assert_eq!(log.read_canonical().unwrap()[0].record(), Some(&record));
    }

    #[test]
    fn merge_prefers_replacements() {
        let mut a = RewriteReport {
            stores: vec![StoreRewrite {
                store: CANONICAL.into(),
                role: StoreRole::Canonical,
                outcome: RewriteOutcome::NotFound,
            }],
        };
        let b = RewriteReport {
            stores: vec![
                StoreRewrite {
                    store: CANONICAL.into(),
                    role: StoreRole::Canonical,
                    outcome: RewriteOutcome::Replaced {
                        matched: LineMatch::Exact,
                    },
                },
                StoreRewrite {
                    store: MIRROR.into(),
                    role: StoreRole::Mirror,
                    outcome: RewriteOutcome::NotFound,
                },
            ],
        };
        a.merge(b);
        assert!(a.canonical_replaced());
        assert_eq!(a.stores.len(), 2);
    }

    #[test]
    fn rename_counts_each_store() {
        let dir = tempfile::tempdir().unwrap();
        let log = dual(dir.path());
        log.append(&EventRecord::start("a", 1)).unwrap();
        log.canonical().file.append(&EventRecord::stop("a", 2, None)).unwrap();

        let report = log.rename_job("a", "b").unwrap();
        assert_eq!(
            report.stores,
            vec![(CANONICAL.to_string(), 2), (MIRROR.to_string(), 1)]
        );
        assert_eq!(report.total(), 3);
    }

    #[test]
    fn extra_mirrors_get_numbered_labels() {
        let log = ReplicatedLog::new("c", vec!["m1".into(), "m2".into()]);
        let labels: Vec<&str> = log.stores().iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["canonical", "mirror", "mirror-2"]);
    }
}
