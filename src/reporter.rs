use chrono::{Local, TimeZone};

use crate::events::Event;
use crate::journal::LineMatch;
use crate::model::EventKind;
use crate::replication::RewriteOutcome;
use crate::timer::{TimerState, format_hm};

/// Reporter collects events and renders them as human text or JSON lines.
///
/// Human mode sends rejections, warnings and errors to stderr and
/// everything else to stdout. JSON mode writes every event to stdout.
pub struct Reporter {
    events: Vec<Event>,
    json_mode: bool,
    quiet: bool,
}

impl Reporter {
    pub fn new(json_mode: bool) -> Self {
        Self {
            events: Vec::new(),
            json_mode,
            quiet: false,
        }
    }

    /// Collect events without printing anything.
    pub fn silent() -> Self {
        Self {
            events: Vec::new(),
            json_mode: false,
            quiet: true,
        }
    }

    pub fn record(&mut self, event: Event) {
        if !self.quiet {
            if self.json_mode {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{line}");
                }
            } else if is_diagnostic(&event) {
                eprintln!("{}", render(&event));
            } else {
                println!("{}", render(&event));
            }
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

fn is_diagnostic(event: &Event) -> bool {
    matches!(
        event,
        Event::Rejected { .. }
            | Event::StoreFailure { .. }
            | Event::ValidationWarning { .. }
            | Event::Malformed { .. }
            | Event::Error { .. }
    )
}

/// Human rendering of one event.
pub fn render(event: &Event) -> String {
    match event {
        Event::Transition {
            event,
            job,
            elapsed_ms,
            task,
            ..
        } => match event {
            EventKind::Start => format!("Started {job}"),
            EventKind::Pause => format!("Paused {job} at {}", format_hm(*elapsed_ms)),
            EventKind::Resume => format!("Resumed {job} at {}", format_hm(*elapsed_ms)),
            EventKind::Stop => match task {
                Some(task) => format!("Stopped {job} after {} ({task})", format_hm(*elapsed_ms)),
                None => format!("Stopped {job} after {}", format_hm(*elapsed_ms)),
            },
        },
        Event::StoreFailure { store, error } => {
            format!("warning: {store} store was not updated: {error}")
        }
        Event::Rejected { reason } => format!("rejected: {reason}"),
        Event::Status { timer, elapsed_ms } => match timer {
            TimerState::Idle => "Idle".to_string(),
            TimerState::Running { job, .. } => {
                format!("Working on {job}: {}", format_hm(*elapsed_ms))
            }
            TimerState::Paused { job, .. } => format!("Paused {job}: {}", format_hm(*elapsed_ms)),
        },
        Event::Tick {
            job,
            paused,
            elapsed_ms,
        } => {
            let label = if *paused { "Paused" } else { "Working on" };
            format!("{label} {job}: {}", format_hm(*elapsed_ms))
        }
        Event::Job { name } => name.clone(),
        Event::JobAdded { job } => format!("Added job {job}"),
        Event::JobRenamed { old, new, records } => {
            format!("Renamed {old} to {new} ({records} logged records updated)")
        }
        Event::JobDeleted { job } => format!("Deleted job {job}"),
        Event::Session(s) => {
            let mut line = format!(
                "{}  {} - {}  {:<16} {:>6.2}h",
                clock(s.start, "%Y-%m-%d"),
                clock(s.start, "%H:%M"),
                clock(s.stop, "%H:%M"),
                s.job,
                s.duration_ms as f64 / 3_600_000.0
            );
            if s.pauses > 0 {
                line.push_str(&format!("  [{} pause{}]", s.pauses, plural(s.pauses as usize)));
            }
            if let Some(task) = &s.task {
                line.push_str("  ");
                line.push_str(task);
            }
            line
        }
        Event::JobTotal { job, total_ms } => format!("{job}: {}", format_hm(*total_ms)),
        Event::DayTotal { day, job, total_ms } => {
            format!("{day}  {job}: {}", format_hm(*total_ms))
        }
        Event::LoggedEvent {
            event,
            job,
            timestamp,
            task,
            occurrences,
        } => {
            let places: Vec<String> = occurrences
                .iter()
                .map(|o| format!("{}:{}", o.store, o.line_index))
                .collect();
            let mut line = format!(
                "{}  {:<6} {job}  [{}]",
                clock(*timestamp, "%Y-%m-%d %H:%M:%S"),
                event,
                places.join(", ")
            );
            if let Some(task) = task {
                line.push_str("  ");
                line.push_str(task);
            }
            line
        }
        Event::Malformed {
            store,
            line_index,
            raw,
            error,
        } => format!("{store}:{line_index}: {error}: {raw}"),
        Event::EditApplied { stores } => {
            let parts: Vec<String> = stores
                .iter()
                .map(|s| match &s.outcome {
                    RewriteOutcome::Replaced { matched } => {
                        let how = match matched {
                            LineMatch::Exact => "exact",
                            LineMatch::Structural => "structural",
                        };
                        format!("{}: replaced ({how})", s.store)
                    }
                    RewriteOutcome::NotFound => format!("{}: not found", s.store),
                    RewriteOutcome::Failed { error } => format!("{}: failed: {error}", s.store),
                })
                .collect();
            format!("Edited: {}", parts.join("; "))
        }
        Event::NothingMatched { target } => format!("No stored line matched {target}"),
        Event::ValidationWarning { message } => format!("warning: {message}"),
        Event::CheckPassed { jobs } => {
            format!("No ordering problems in {jobs} job{}", plural(*jobs))
        }
        Event::Info { message } => message.clone(),
        Event::Error { message } => format!("error: {message}"),
    }
}

fn clock(ms: i64, fmt: &str) -> String {
    match Local.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format(fmt).to_string(),
        None => ms.to_string(),
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{StoreRewrite, StoreRole};
    use pretty_assertions::assert_eq;

    #[test]
    fn transitions_render_elapsed_time() {
        let stop = Event::Transition {
            event: EventKind::Stop,
            job: "docs".into(),
            timestamp: 0,
            elapsed_ms: 90 * 60_000,
            task: Some("review".into()),
        };
        assert_eq!(render(&stop), "Stopped docs after 1h 30m (review)");
    }

    #[test]
    fn json_lines_are_tagged() {
        let line = serde_json::to_string(&Event::JobAdded { job: "a".into() }).unwrap();
        assert_eq!(line, r#"{"type":"job_added","job":"a"}"#);
    }

    #[test]
    fn edit_rendering_lists_each_store() {
        let event = Event::EditApplied {
            stores: vec![
                StoreRewrite {
                    store: "canonical".into(),
                    role: StoreRole::Canonical,
                    outcome: RewriteOutcome::Replaced {
                        matched: LineMatch::Structural,
                    },
                },
                StoreRewrite {
                    store: "mirror".into(),
                    role: StoreRole::Mirror,
                    outcome: RewriteOutcome::NotFound,
                },
            ],
        };
        assert_eq!(
            render(&event),
            "Edited: canonical: replaced (structural); mirror: not found"
        );
    }

    #[test]
    fn silent_reporter_still_collects() {
        let mut reporter = Reporter::silent();
        reporter.record(Event::CheckPassed { jobs: 1 });
        assert_eq!(render(&reporter.events()[0]), "No ordering problems in 1 job");
    }
}
