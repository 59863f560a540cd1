use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::model::EventRecord;

/// A transition refused by the live timer. Nothing is logged when this
/// happens and the state is left as it was.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejected {
    #[error("job '{0}' is already active")]
    AlreadyActive(String),
    #[error("no job is running")]
    NotRunning,
    #[error("the running job is not paused")]
    NotPaused,
    #[error("no active job to stop")]
    Idle,
}

/// Live state of the one job this process may be timing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TimerState {
    #[default]
    Idle,
    Running {
        job: String,
        started_at: i64,
        /// Active time banked before the current running segment.
        elapsed_before_ms: i64,
    },
    Paused {
        job: String,
        paused_at: i64,
        elapsed_before_ms: i64,
    },
}

/// Result of a successful Stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stopped {
    pub record: EventRecord,
    /// Accumulated active time including the final running segment.
    pub elapsed_ms: i64,
}

/// Single-owner live timer. Every transition is a pure function of the
/// current state and `now`; persisting the returned record is the caller's
/// job. Not reconstructed from the log on restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveTimer {
    state: TimerState,
}

impl LiveTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, TimerState::Running { .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state, TimerState::Paused { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, TimerState::Idle)
    }

    pub fn current_job(&self) -> Option<&str> {
        match &self.state {
            TimerState::Idle => None,
            TimerState::Running { job, .. } | TimerState::Paused { job, .. } => Some(job),
        }
    }

    /// Active time so far, for display only.
    pub fn elapsed_ms(&self, now: i64) -> i64 {
        match &self.state {
            TimerState::Idle => 0,
            TimerState::Running {
                started_at,
                elapsed_before_ms,
                ..
            } => elapsed_before_ms.saturating_add(now.saturating_sub(*started_at).max(0)),
            TimerState::Paused {
                elapsed_before_ms, ..
            } => *elapsed_before_ms,
        }
    }

    pub fn start(&mut self, job: &str, now: i64) -> Result<EventRecord, Rejected> {
        if let Some(active) = self.current_job() {
            return Err(Rejected::AlreadyActive(active.to_string()));
        }
        self.state = TimerState::Running {
            job: job.to_string(),
            started_at: now,
            elapsed_before_ms: 0,
        };
        Ok(EventRecord::start(job, now))
    }

    pub fn pause(&mut self, now: i64) -> Result<EventRecord, Rejected> {
        let TimerState::Running {
            job,
            started_at,
            elapsed_before_ms,
        } = &self.state
        else {
            return Err(Rejected::NotRunning);
        };
        let record = EventRecord::pause(job.as_str(), now);
        self.state = TimerState::Paused {
            job: job.clone(),
            paused_at: now,
            elapsed_before_ms: elapsed_before_ms
                .saturating_add(now.saturating_sub(*started_at).max(0)),
        };
        Ok(record)
    }

    pub fn resume(&mut self, now: i64) -> Result<EventRecord, Rejected> {
        let TimerState::Paused {
            job,
            elapsed_before_ms,
            ..
        } = &self.state
        else {
            return Err(Rejected::NotPaused);
        };
        let record = EventRecord::resume(job.as_str(), now);
        self.state = TimerState::Running {
            job: job.clone(),
            started_at: now,
            elapsed_before_ms: *elapsed_before_ms,
        };
        Ok(record)
    }

    pub fn stop(&mut self, task: Option<&str>, now: i64) -> Result<Stopped, Rejected> {
        let Some(job) = self.current_job() else {
            return Err(Rejected::Idle);
        };
        let stopped = Stopped {
            record: EventRecord::stop(job, now, task),
            elapsed_ms: self.elapsed_ms(now),
        };
        self.state = TimerState::Idle;
        Ok(stopped)
    }

    /// Follow a job rename so later events carry the new name.
    pub fn rename_job(&mut self, old: &str, new: &str) {
        if let TimerState::Running { job, .. } | TimerState::Paused { job, .. } = &mut self.state
            && job.as_str() == old
        {
            *job = new.to_string();
        }
    }

    /// One-line status, e.g. `Working on docs: 1h 5m`.
    pub fn status_line(&self, now: i64) -> String {
        let elapsed = format_hm(self.elapsed_ms(now));
        match &self.state {
            TimerState::Idle => "Idle".to_string(),
            TimerState::Running { job, .. } => format!("Working on {job}: {elapsed}"),
            TimerState::Paused { job, .. } => format!("Paused {job}: {elapsed}"),
        }
    }
}

/// `Xh Ym`, truncating seconds.
pub fn format_hm(ms: i64) -> String {
    let total_minutes = ms.max(0) / 60_000;
    format!("{}h {}m", total_minutes / 60, total_minutes % 60)
}

/// Cancelable fixed-cadence refresh schedule for the elapsed display.
///
/// Driven cooperatively: the owner asks how long it may block, then calls
/// [`Ticker::fire`] after waking.
#[derive(Debug, Clone)]
pub struct Ticker {
    interval: Duration,
    next: Option<Instant>,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(10)),
            next: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_armed(&self) -> bool {
        self.next.is_some()
    }

    /// Schedule the first refresh one interval from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.next = Some(now + self.interval);
    }

    pub fn cancel(&mut self) {
        self.next = None;
    }

    /// How long the owner may wait before the next refresh is due.
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        self.next.map(|next| next.saturating_duration_since(now))
    }

    /// True when a refresh is due; reschedules the following one. Missed
    /// ticks are coalesced rather than replayed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.next {
            Some(next) if now >= next => {
                let mut following = next + self.interval;
                if following <= now {
                    following = now + self.interval;
                }
                self.next = Some(following);
                true
            }
            _ => false,
        }
    }
}
