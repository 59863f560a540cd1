use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Timer transition kind.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    JsonSchema,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A job begins.
    Start,
    /// The running job is suspended.
    Pause,
    /// A paused job continues.
    Resume,
    /// The job ends, optionally with a task note.
    Stop,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Pause => "pause",
            EventKind::Resume => "resume",
            EventKind::Stop => "stop",
        }
    }

    /// Case-insensitive tag lookup.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "start" => Some(EventKind::Start),
            "pause" => Some(EventKind::Pause),
            "resume" => Some(EventKind::Resume),
            "stop" => Some(EventKind::Stop),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Why a candidate line is not a valid record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("not valid UTF-8 after byte {0}")]
    NotUtf8(usize),
    #[error("not a JSON object: {0}")]
    NotJson(String),
    #[error("missing or non-string `event`")]
    MissingEvent,
    #[error("unknown event tag `{0}`")]
    UnknownEvent(String),
    #[error("missing or empty `job`")]
    MissingJob,
    #[error("missing or non-numeric `timestamp`")]
    BadTimestamp,
    #[error("`task` must be a string")]
    BadTask,
}

/// One persisted timer transition. Identified by value, never by id.
///
/// `task` is only ever `Some` on a Stop and never holds an empty string;
/// the constructors and the parser both normalize to that shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventRecord {
    pub event: EventKind,
    pub job: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub task: Option<String>,
}

impl EventRecord {
    /// Build a record, enforcing the shape rules of the wire format.
    pub fn new(
        event: EventKind,
        job: impl Into<String>,
        timestamp: i64,
        task: Option<String>,
    ) -> Result<Self, RecordError> {
        let job = job.into();
        if job.is_empty() {
            return Err(RecordError::MissingJob);
        }
        let task = match event {
            EventKind::Stop => task.filter(|t| !t.is_empty()),
            _ => None,
        };
        Ok(Self {
            event,
            job,
            timestamp,
            task,
        })
    }

    pub fn start(job: impl Into<String>, timestamp: i64) -> Self {
        Self::unchecked(EventKind::Start, job.into(), timestamp, None)
    }

    pub fn pause(job: impl Into<String>, timestamp: i64) -> Self {
        Self::unchecked(EventKind::Pause, job.into(), timestamp, None)
    }

    pub fn resume(job: impl Into<String>, timestamp: i64) -> Self {
        Self::unchecked(EventKind::Resume, job.into(), timestamp, None)
    }

    pub fn stop(job: impl Into<String>, timestamp: i64, task: Option<&str>) -> Self {
        let task = task.filter(|t| !t.is_empty()).map(str::to_string);
        Self::unchecked(EventKind::Stop, job.into(), timestamp, task)
    }

    fn unchecked(event: EventKind, job: String, timestamp: i64, task: Option<String>) -> Self {
        Self {
            event,
            job,
            timestamp,
            task,
        }
    }

    /// Task note, empty when absent.
    pub fn task_or_empty(&self) -> &str {
        self.task.as_deref().unwrap_or("")
    }

    /// Same event, job and timestamp. Used by the structural line matcher.
    pub fn same_identity(&self, other: &EventRecord) -> bool {
        self.event == other.event && self.job == other.job && self.timestamp == other.timestamp
    }

    /// Key under which exact duplicates collapse into one logical event.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            event: self.event,
            job: self.job.clone(),
            timestamp: self.timestamp,
            task: self.task_or_empty().to_string(),
        }
    }

    /// Serialize to a single line (no trailing newline).
    pub fn to_line(&self) -> String {
        let wire = WireRecord {
            event: self.event,
            job: self.job.clone(),
            timestamp: self.timestamp,
            task: match self.event {
                EventKind::Stop => Some(self.task_or_empty().to_string()),
                _ => None,
            },
        };
        // A struct of strings and integers cannot fail to serialize.
        serde_json::to_string(&wire).unwrap_or_default()
    }

    /// Parse one line. Whitespace and key order are irrelevant.
    pub fn parse_line(line: &str) -> Result<Self, RecordError> {
        let value: Value =
            serde_json::from_str(line.trim()).map_err(|e| RecordError::NotJson(e.to_string()))?;
        let obj = value
            .as_object()
            .ok_or_else(|| RecordError::NotJson("expected an object".to_string()))?;

        let tag = obj
            .get("event")
            .and_then(Value::as_str)
            .ok_or(RecordError::MissingEvent)?;
        let event =
            EventKind::from_tag(tag).ok_or_else(|| RecordError::UnknownEvent(tag.to_string()))?;

        let job = obj
            .get("job")
            .and_then(Value::as_str)
            .filter(|j| !j.is_empty())
            .ok_or(RecordError::MissingJob)?;

        let timestamp = obj
            .get("timestamp")
            .and_then(parse_timestamp)
            .ok_or(RecordError::BadTimestamp)?;

        let task = match (event, obj.get("task")) {
            (EventKind::Stop, Some(Value::String(t))) => Some(t.clone()),
            (EventKind::Stop, Some(Value::Null) | None) => None,
            (EventKind::Stop, Some(_)) => return Err(RecordError::BadTask),
            _ => None,
        };

        EventRecord::new(event, job, timestamp, task)
    }
}

fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                let f = n.as_f64()?;
                (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .then_some(f as i64)
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

/// `(event, job, timestamp, task-or-empty)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub event: EventKind,
    pub job: String,
    pub timestamp: i64,
    pub task: String,
}

/// On-disk shape of one log line.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WireRecord {
    /// Transition tag.
    pub event: EventKind,
    /// Job name (non-empty, case-sensitive).
    pub job: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Task note; written on `stop` only (empty string for no note).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

/// Generate JSON Schema for one log line.
pub fn generate_schema() -> String {
    let schema = schemars::schema_for!(WireRecord);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
