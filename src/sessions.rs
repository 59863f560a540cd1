//! Session reconstruction from the logical event log.
//!
//! Every job runs its own small state machine; jobs never share state. A
//! Start that arrives while a session of the same job is still open closes
//! that session at the new Start's timestamp. This is a recovery heuristic
//! for logs where a Stop was lost, not a validated rule: validation (see
//! [`crate::validate::validate_ordering`]) still reports it.

use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDate, TimeZone};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::model::{EventKind, EventRecord};

/// A closed start→stop span with net active time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub job: String,
    pub start: i64,
    pub stop: i64,
    /// Wall-clock span minus paused intervals, never negative.
    pub duration_ms: i64,
    pub task: Option<String>,
    /// Completed pause/resume pairs inside the session.
    pub pauses: u32,
}

/// A session with no closing event yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenSession {
    pub job: String,
    pub start: i64,
    pub paused: bool,
}

/// Output of one reconstruction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconstruction {
    /// Closed sessions, ordered by start.
    pub sessions: Vec<Session>,
    /// Sessions still open at the end of the log. Never reported as sessions.
    pub open: Vec<OpenSession>,
}

#[derive(Debug)]
struct Cursor {
    start: i64,
    task: Option<String>,
    accumulated_ms: i64,
    /// `Some` while active, `None` while paused.
    active_since: Option<i64>,
    pauses: u32,
}

impl Cursor {
    fn close(self, job: &str, stop: i64, stop_task: Option<&str>) -> Session {
        let mut accumulated = self.accumulated_ms;
        if let Some(since) = self.active_since {
            accumulated = accumulated.saturating_add(stop.saturating_sub(since));
        }
        let task = stop_task
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or(self.task);
        Session {
            job: job.to_string(),
            start: self.start,
            stop,
            duration_ms: accumulated.max(0),
            task,
            pauses: self.pauses,
        }
    }
}

/// Rebuild sessions from a deduplicated, time-sorted event stream.
pub fn reconstruct(events: &[EventRecord]) -> Reconstruction {
    let mut open: HashMap<&str, Cursor> = HashMap::new();
    let mut sessions = Vec::new();

    for e in events {
        let job = e.job.as_str();
        match e.event {
            EventKind::Start => {
                if let Some(dangling) = open.remove(job) {
                    tracing::debug!(job, start = dangling.start, at = e.timestamp, "closing dangling session");
                    sessions.push(dangling.close(job, e.timestamp, None));
                }
                open.insert(
                    job,
                    Cursor {
                        start: e.timestamp,
                        task: e.task.clone(),
                        accumulated_ms: 0,
                        active_since: Some(e.timestamp),
                        pauses: 0,
                    },
                );
            }
            EventKind::Pause => {
                if let Some(cursor) = open.get_mut(job)
                    && let Some(since) = cursor.active_since.take()
                {
                    cursor.accumulated_ms = cursor
                        .accumulated_ms
                        .saturating_add(e.timestamp.saturating_sub(since));
                }
            }
            EventKind::Resume => {
                if let Some(cursor) = open.get_mut(job)
                    && cursor.active_since.is_none()
                {
                    cursor.active_since = Some(e.timestamp);
                    cursor.pauses += 1;
                }
            }
            EventKind::Stop => {
                if let Some(cursor) = open.remove(job) {
                    sessions.push(cursor.close(job, e.timestamp, e.task.as_deref()));
                }
            }
        }
    }

    sessions.sort_by_key(|s| s.start);
    let mut open: Vec<OpenSession> = open
        .into_iter()
        .map(|(job, cursor)| OpenSession {
            job: job.to_string(),
            start: cursor.start,
            paused: cursor.active_since.is_none(),
        })
        .collect();
    open.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.job.cmp(&b.job)));

    Reconstruction { sessions, open }
}

/// Closed sessions only.
pub fn build_sessions(events: &[EventRecord]) -> Vec<Session> {
    reconstruct(events).sessions
}

/// Named date ranges, resolved against a local "today".
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RangePreset {
    Today,
    ThisWeek,
    #[value(name = "last-7")]
    Last7,
    ThisMonth,
    #[value(name = "last-3-months")]
    Last3Months,
    All,
}

impl RangePreset {
    /// Inclusive `(from, to)` days, or `None` for no date restriction.
    pub fn resolve(self, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let from = match self {
            RangePreset::All => return None,
            RangePreset::Today => today,
            RangePreset::ThisWeek => {
                today - ChronoDuration::days(today.weekday().num_days_from_monday() as i64)
            }
            RangePreset::Last7 => today - ChronoDuration::days(6),
            RangePreset::ThisMonth => today.with_day(1)?,
            RangePreset::Last3Months => {
                let first = today.with_day(1)?;
                first.checked_sub_months(chrono::Months::new(2))?
            }
        };
        Some((from, today))
    }
}

/// Which sessions to report.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Empty means every job.
    pub jobs: BTreeSet<String>,
    /// Inclusive range of local days the session starts in.
    pub range: Option<(NaiveDate, NaiveDate)>,
}

impl SessionFilter {
    pub fn job(name: impl Into<String>) -> Self {
        Self {
            jobs: BTreeSet::from([name.into()]),
            range: None,
        }
    }

    pub fn matches(&self, session: &Session) -> bool {
        if !self.jobs.is_empty() && !self.jobs.contains(&session.job) {
            return false;
        }
        match (self.range, local_day(session.start)) {
            (Some((from, to)), Some(day)) => day >= from && day <= to,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    pub fn apply(&self, sessions: Vec<Session>) -> Vec<Session> {
        sessions.into_iter().filter(|s| self.matches(s)).collect()
    }
}

/// Local calendar day of a millisecond timestamp.
pub fn local_day(ms: i64) -> Option<NaiveDate> {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.date_naive())
}

/// Net milliseconds per job.
pub fn totals_by_job(sessions: &[Session]) -> BTreeMap<String, i64> {
    let mut totals = BTreeMap::new();
    for s in sessions {
        let total = totals.entry(s.job.clone()).or_insert(0i64);
        *total = total.saturating_add(s.duration_ms);
    }
    totals
}

/// Net milliseconds per local start day, then per job.
pub fn daily_totals(sessions: &[Session]) -> BTreeMap<NaiveDate, BTreeMap<String, i64>> {
    let mut days: BTreeMap<NaiveDate, BTreeMap<String, i64>> = BTreeMap::new();
    for s in sessions {
        let Some(day) = local_day(s.start) else {
            continue;
        };
        let total = days.entry(day).or_default().entry(s.job.clone()).or_insert(0);
        *total = total.saturating_add(s.duration_ms);
    }
    days
}
