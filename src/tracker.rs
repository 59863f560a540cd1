//! The command surface: one object owning the live timer, the job registry
//! and the replicated log.
//!
//! Every mutating call either returns [`Outcome::Rejected`] with nothing
//! written, or [`Outcome::Applied`] with the refreshed derived view. Storage
//! failures are errors.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::config::Paths;
use crate::edit::{self, EditReport, EventEdit};
use crate::jobs::JobRegistry;
use crate::journal::LogEntry;
use crate::model::EventRecord;
use crate::replication::{RenameReport, ReplicatedLog, WriteReport};
use crate::sessions::{OpenSession, Session, SessionFilter, reconstruct};
use crate::timer::{LiveTimer, Rejected};
use crate::validate::{LogicalEvent, Occurrence, group_occurrences, logical_log, validate_ordering};

/// A request refused without touching storage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error(transparent)]
    Transition(#[from] Rejected),
    #[error("job name must not be empty")]
    EmptyJobName,
    #[error("job '{0}' does not exist")]
    UnknownJob(String),
    #[error("job '{0}' already exists")]
    DuplicateJob(String),
}

/// Derived state handed back after a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct View {
    pub jobs: Vec<String>,
    pub sessions: Vec<Session>,
    pub open: Vec<OpenSession>,
}

#[derive(Debug)]
pub enum Outcome<T> {
    Applied { detail: T, view: View },
    Rejected(Rejection),
}

impl<T> Outcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Outcome::Rejected(r) => Some(r),
            Outcome::Applied { .. } => None,
        }
    }

    pub fn detail(&self) -> Option<&T> {
        match self {
            Outcome::Applied { detail, .. } => Some(detail),
            Outcome::Rejected(_) => None,
        }
    }
}

/// Result of an ordering check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub jobs: Vec<String>,
    pub problems: Vec<String>,
}

/// A logged timer transition.
#[derive(Debug, Clone)]
pub struct Transitioned {
    pub record: EventRecord,
    /// Active time of the current session after the transition.
    pub elapsed_ms: i64,
    pub writes: WriteReport,
}

#[derive(Debug)]
pub struct Tracker {
    log: ReplicatedLog,
    registry: JobRegistry,
    timer: LiveTimer,
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Tracker {
    pub fn new(log: ReplicatedLog, registry: JobRegistry) -> Self {
        Self {
            log,
            registry,
            timer: LiveTimer::new(),
        }
    }

    pub fn open(paths: &Paths) -> Self {
        Self::new(
            ReplicatedLog::new(paths.log.clone(), paths.mirrors.clone()),
            JobRegistry::new(paths.jobs.clone()),
        )
    }

    pub fn log(&self) -> &ReplicatedLog {
        &self.log
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn timer(&self) -> &LiveTimer {
        &self.timer
    }

    pub fn start(&mut self, job: &str) -> Result<Outcome<Transitioned>> {
        self.start_at(job, now_ms())
    }

    /// Start timing `job`, registering it if it is new.
    pub fn start_at(&mut self, job: &str, now: i64) -> Result<Outcome<Transitioned>> {
        let job = job.trim();
        if job.is_empty() {
            return Ok(Outcome::Rejected(Rejection::EmptyJobName));
        }
        let mut next = self.timer.clone();
        let record = match next.start(job, now) {
            Ok(record) => record,
            Err(rejected) => return Ok(Outcome::Rejected(rejected.into())),
        };
        // An unreadable registry fails the command before anything is logged.
        if self.registry.add(job)? {
            tracing::info!(job, "registered job on first start");
        }
        let writes = self.commit(next, &record)?;
        self.applied(Transitioned {
            record,
            elapsed_ms: 0,
            writes,
        })
    }

    pub fn pause(&mut self) -> Result<Outcome<Transitioned>> {
        self.pause_at(now_ms())
    }

    pub fn pause_at(&mut self, now: i64) -> Result<Outcome<Transitioned>> {
        let mut next = self.timer.clone();
        match next.pause(now) {
            Ok(record) => self.transition(next, record, now),
            Err(rejected) => Ok(Outcome::Rejected(rejected.into())),
        }
    }

    pub fn resume(&mut self) -> Result<Outcome<Transitioned>> {
        self.resume_at(now_ms())
    }

    pub fn resume_at(&mut self, now: i64) -> Result<Outcome<Transitioned>> {
        let mut next = self.timer.clone();
        match next.resume(now) {
            Ok(record) => self.transition(next, record, now),
            Err(rejected) => Ok(Outcome::Rejected(rejected.into())),
        }
    }

    pub fn stop(&mut self, task: Option<&str>) -> Result<Outcome<Transitioned>> {
        self.stop_at(task, now_ms())
    }

    pub fn stop_at(&mut self, task: Option<&str>, now: i64) -> Result<Outcome<Transitioned>> {
        let mut next = self.timer.clone();
        let stopped = match next.stop(task, now) {
            Ok(stopped) => stopped,
            Err(rejected) => return Ok(Outcome::Rejected(rejected.into())),
        };
        let writes = self.commit(next, &stopped.record)?;
        self.applied(Transitioned {
            record: stopped.record,
            elapsed_ms: stopped.elapsed_ms,
            writes,
        })
    }

    fn transition(
        &mut self,
        next: LiveTimer,
        record: EventRecord,
        now: i64,
    ) -> Result<Outcome<Transitioned>> {
        let elapsed_ms = next.elapsed_ms(now);
        let writes = self.commit(next, &record)?;
        self.applied(Transitioned {
            record,
            elapsed_ms,
            writes,
        })
    }

    /// Persist `record`, then adopt `next`. A canonical failure leaves the
    /// live state as it was.
    fn commit(&mut self, next: LiveTimer, record: &EventRecord) -> Result<WriteReport> {
        let writes = self
            .log
            .append(record)
            .with_context(|| format!("failed to log {} for '{}'", record.event, record.job))?;
        self.timer = next;
        Ok(writes)
    }

    fn applied<T>(&self, detail: T) -> Result<Outcome<T>> {
        Ok(Outcome::Applied {
            detail,
            view: self.view()?,
        })
    }

    pub fn add_job(&mut self, name: &str) -> Result<Outcome<String>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(Outcome::Rejected(Rejection::EmptyJobName));
        }
        if !self.registry.add(name)? {
            return Ok(Outcome::Rejected(Rejection::DuplicateJob(name.to_string())));
        }
        tracing::info!(job = name, "job added");
        self.applied(name.to_string())
    }

    /// Rename a job in the registry, in every store and in the live timer.
    /// Renaming onto an existing job merges the two.
    pub fn rename_job(&mut self, old: &str, new: &str) -> Result<Outcome<RenameReport>> {
        let new = new.trim();
        if new.is_empty() {
            return Ok(Outcome::Rejected(Rejection::EmptyJobName));
        }
        if !self.registry.contains(old)? {
            return Ok(Outcome::Rejected(Rejection::UnknownJob(old.to_string())));
        }
        let report = self
            .log
            .rename_job(old, new)
            .with_context(|| format!("failed to rename '{old}' in the log"))?;
        self.registry.rename(old, new)?;
        self.timer.rename_job(old, new);
        tracing::info!(old, new, records = report.total(), "job renamed");
        self.applied(report)
    }

    /// Remove a job from the registry. Its logged events are kept.
    pub fn delete_job(&mut self, name: &str) -> Result<Outcome<String>> {
        if !self.registry.delete(name)? {
            return Ok(Outcome::Rejected(Rejection::UnknownJob(name.to_string())));
        }
        tracing::info!(job = name, "job deleted");
        self.applied(name.to_string())
    }

    pub fn list_jobs(&self) -> Result<Vec<String>> {
        Ok(self.registry.list()?)
    }

    /// Closed sessions from the logical log of every store.
    pub fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let events = logical_log(&self.entries()?);
        Ok(filter.apply(reconstruct(&events).sessions))
    }

    pub fn view(&self) -> Result<View> {
        let events = logical_log(&self.entries()?);
        let reconstruction = reconstruct(&events);
        Ok(View {
            jobs: self.list_jobs()?,
            sessions: reconstruction.sessions,
            open: reconstruction.open,
        })
    }

    /// Every stored line, malformed ones included.
    pub fn entries(&self) -> Result<Vec<LogEntry>> {
        self.log.read_all().context("failed to read the event log")
    }

    pub fn logical_events(&self) -> Result<Vec<LogicalEvent>> {
        Ok(group_occurrences(&self.entries()?))
    }

    pub fn edit_event(
        &mut self,
        occurrences: &[Occurrence],
        new_record: &EventRecord,
    ) -> Result<Outcome<EditReport>> {
        self.edit_events(&[EventEdit {
            occurrences: occurrences.to_vec(),
            new_record: new_record.clone(),
        }])
    }

    pub fn edit_events(&mut self, edits: &[EventEdit]) -> Result<Outcome<EditReport>> {
        if edits.iter().any(|e| e.new_record.job.trim().is_empty()) {
            return Ok(Outcome::Rejected(Rejection::EmptyJobName));
        }
        let report = edit::apply_edits(&self.log, edits)?;
        self.applied(report)
    }

    /// Ordering violations in the canonical store, for one job or all.
    pub fn check(&self, job: Option<&str>) -> Result<CheckReport> {
        let canonical = self
            .log
            .read_canonical()
            .context("failed to read the canonical log")?;
        let events = logical_log(&canonical);
        let jobs: BTreeSet<&str> = match job {
            Some(job) => BTreeSet::from([job]),
            None => events.iter().map(|e| e.job.as_str()).collect(),
        };
        let problems = jobs
            .iter()
            .flat_map(|job| validate_ordering(job, &events))
            .collect();
        Ok(CheckReport {
            jobs: jobs.into_iter().map(str::to_string).collect(),
            problems,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerState;
    use pretty_assertions::assert_eq;

    fn tracker(dir: &std::path::Path) -> Tracker {
        Tracker::open(&Paths::in_dir(dir.join("store"), Some(&dir.join("ws"))))
    }

    #[test]
    fn start_registers_job_and_logs_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let outcome = t.start_at("  docs ", 10).unwrap();
        let Outcome::Applied { detail, view } = outcome else {
            panic!("start rejected");
        };
        assert_eq!(detail.record, EventRecord::start("docs", 10));
        assert_eq!(detail.writes.failures().count(), 0);
        assert_eq!(view.jobs, vec!["docs"]);
        assert_eq!(view.open.len(), 1);
        assert_eq!(t.entries().unwrap().len(), 2);
    }

    #[test]
    fn corrupt_registry_fails_start_before_logging() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        std::fs::create_dir_all(dir.path().join("store")).unwrap();
        std::fs::write(dir.path().join("store/jobs.json"), "{not a list").unwrap();

        assert!(t.start_at("docs", 10).is_err());
        assert!(t.timer().is_idle());
        assert!(t.entries().unwrap().is_empty());
    }

    #[test]
    fn second_start_is_rejected_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        t.start_at("a", 1).unwrap();
        let outcome = t.start_at("b", 2).unwrap();
        assert_eq!(
            outcome.rejection(),
            Some(&Rejection::Transition(Rejected::AlreadyActive("a".into())))
        );
        assert_eq!(t.log().read_canonical().unwrap().len(), 1);
        assert_eq!(t.list_jobs().unwrap(), vec!["a"]);
    }

    #[test]
    fn canonical_failure_keeps_live_state() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "").unwrap();
        let mut t = Tracker::new(
            ReplicatedLog::new(blocker.join("logs.jsonl"), Vec::new()),
            JobRegistry::new(dir.path().join("jobs.json")),
        );
        assert!(t.start_at("a", 1).is_err());
        assert_eq!(t.timer().state(), &TimerState::Idle);
    }

    #[test]
    fn full_session_appears_in_view() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        t.start_at("x", 1000).unwrap();
        t.pause_at(1500).unwrap();
        t.resume_at(2000).unwrap();
        let Outcome::Applied { detail, view } = t.stop_at(Some("done"), 3000).unwrap() else {
            panic!("stop rejected");
        };
        assert_eq!(detail.elapsed_ms, 1500);
        assert_eq!(view.sessions.len(), 1);
        assert_eq!(view.sessions[0].duration_ms, 1500);
        assert_eq!(view.sessions[0].task.as_deref(), Some("done"));
        assert!(view.open.is_empty());
    }

    #[test]
    fn registry_misuse_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        assert_eq!(t.add_job(" ").unwrap().rejection(), Some(&Rejection::EmptyJobName));
        assert!(t.add_job("a").unwrap().is_applied());
        assert_eq!(
            t.add_job("a").unwrap().rejection(),
            Some(&Rejection::DuplicateJob("a".into()))
        );
        assert_eq!(
            t.rename_job("zzz", "b").unwrap().rejection(),
            Some(&Rejection::UnknownJob("zzz".into()))
        );
        assert_eq!(
            t.delete_job("zzz").unwrap().rejection(),
            Some(&Rejection::UnknownJob("zzz".into()))
        );
    }

    #[test]
    fn delete_keeps_logged_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        t.start_at("a", 1).unwrap();
        t.stop_at(None, 2).unwrap();
        assert!(t.delete_job("a").unwrap().is_applied());
        assert!(t.list_jobs().unwrap().is_empty());
        assert_eq!(t.list_sessions(&SessionFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn rename_while_running_carries_over() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        t.start_at("a", 1).unwrap();
        let outcome = t.rename_job("a", "b").unwrap();
        assert_eq!(outcome.detail().map(RenameReport::total), Some(2));
        t.stop_at(None, 5).unwrap();

        let sessions = t.list_sessions(&SessionFilter::job("b")).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].start, 1);
    }

    #[test]
    fn check_reports_per_job() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path());
        t.log().append(&EventRecord::stop("a", 1, None)).unwrap();
        t.log().append(&EventRecord::pause("b", 2)).unwrap();
        let all = t.check(None).unwrap();
        assert_eq!(all.jobs, vec!["a", "b"]);
        assert_eq!(all.problems.len(), 2);
        assert_eq!(
            t.check(Some("b")).unwrap().problems,
            vec!["job 'b': pause at 2 is outside any session"]
        );
    }
}
