use chrono::NaiveDate;
use serde::Serialize;

use crate::model::EventKind;
use crate::replication::StoreRewrite;
use crate::sessions::Session;
use crate::timer::TimerState;
use crate::validate::Occurrence;

/// Structured event emitted by a command.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A timer transition that was logged.
    Transition {
        event: EventKind,
        job: String,
        timestamp: i64,
        elapsed_ms: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        task: Option<String>,
    },
    /// A mirror that did not take a write.
    StoreFailure {
        store: String,
        error: String,
    },
    Rejected {
        reason: String,
    },
    Status {
        timer: TimerState,
        elapsed_ms: i64,
    },
    /// Periodic elapsed-time refresh while a job is active.
    Tick {
        job: String,
        paused: bool,
        elapsed_ms: i64,
    },
    Job {
        name: String,
    },
    JobAdded {
        job: String,
    },
    JobRenamed {
        old: String,
        new: String,
        records: usize,
    },
    JobDeleted {
        job: String,
    },
    Session(Session),
    JobTotal {
        job: String,
        total_ms: i64,
    },
    DayTotal {
        day: NaiveDate,
        job: String,
        total_ms: i64,
    },
    LoggedEvent {
        event: EventKind,
        job: String,
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        task: Option<String>,
        occurrences: Vec<Occurrence>,
    },
    Malformed {
        store: String,
        line_index: usize,
        raw: String,
        error: String,
    },
    EditApplied {
        stores: Vec<StoreRewrite>,
    },
    NothingMatched {
        target: String,
    },
    ValidationWarning {
        message: String,
    },
    CheckPassed {
        jobs: usize,
    },
    Info {
        message: String,
    },
    Error {
        message: String,
    },
}
