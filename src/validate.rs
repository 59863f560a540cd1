use serde::Serialize;
use std::collections::HashMap;
use std::collections::HashSet;

use crate::journal::{LogEntry, Parsed};
use crate::model::{DedupKey, EventKind, EventRecord};

/// Where one copy of a logical event lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    pub store: String,
    pub line_index: usize,
    pub raw: String,
}

impl From<&LogEntry> for Occurrence {
    fn from(entry: &LogEntry) -> Self {
        Self {
            store: entry.store.clone(),
            line_index: entry.line_index,
            raw: entry.raw.clone(),
        }
    }
}

/// One deduplicated event with every stored copy of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalEvent {
    pub record: EventRecord,
    pub occurrences: Vec<Occurrence>,
}

/// Build the logical log: valid records only, exact duplicates collapsed,
/// stably sorted by timestamp so ties keep their read order.
pub fn logical_log(entries: &[LogEntry]) -> Vec<EventRecord> {
    let mut seen: HashSet<DedupKey> = HashSet::new();
    let mut events: Vec<EventRecord> = entries
        .iter()
        .filter_map(LogEntry::record)
        .filter(|record| seen.insert(record.dedup_key()))
        .cloned()
        .collect();
    events.sort_by_key(|e| e.timestamp);
    events
}

/// Group valid entries by dedup key, keeping every occurrence. Ordered like
/// [`logical_log`].
pub fn group_occurrences(entries: &[LogEntry]) -> Vec<LogicalEvent> {
    let mut index: HashMap<DedupKey, usize> = HashMap::new();
    let mut grouped: Vec<LogicalEvent> = Vec::new();
    for entry in entries {
        let Some(record) = entry.record() else {
            continue;
        };
        match index.get(&record.dedup_key()) {
            Some(&i) => grouped[i].occurrences.push(entry.into()),
            None => {
                index.insert(record.dedup_key(), grouped.len());
                grouped.push(LogicalEvent {
                    record: record.clone(),
                    occurrences: vec![entry.into()],
                });
            }
        }
    }
    grouped.sort_by_key(|e| e.record.timestamp);
    grouped
}

/// Entries that failed to parse.
pub fn malformed(entries: &[LogEntry]) -> impl Iterator<Item = &LogEntry> {
    entries
        .iter()
        .filter(|e| matches!(e.parsed, Parsed::Malformed(_)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Active { since: i64 },
    Paused { since: i64 },
}

/// Check one job's events for ordering violations.
///
/// `events` may contain other jobs; they are skipped. The input is stably
/// sorted by timestamp before checking. A trailing unstopped Start is a
/// session still in progress and is not reported.
pub fn validate_ordering(job: &str, events: &[EventRecord]) -> Vec<String> {
    let mut own: Vec<&EventRecord> = events.iter().filter(|e| e.job == job).collect();
    own.sort_by_key(|e| e.timestamp);

    let mut problems = Vec::new();
    let mut phase = Phase::Idle;
    let mut opened_at = 0;

    for e in own {
        let ts = e.timestamp;
        phase = match (e.event, phase) {
            (EventKind::Start, Phase::Idle) => {
                opened_at = ts;
                Phase::Active { since: ts }
            }
            (EventKind::Start, _) => {
                problems.push(format!(
                    "job '{job}': start at {ts} follows start at {opened_at} with no stop in between"
                ));
                opened_at = ts;
                Phase::Active { since: ts }
            }
            (EventKind::Pause, Phase::Active { .. }) => Phase::Paused { since: ts },
            (EventKind::Pause, Phase::Paused { since }) => {
                problems.push(format!(
                    "job '{job}': pause at {ts} while already paused since {since}"
                ));
                phase
            }
            (EventKind::Pause, Phase::Idle) => {
                problems.push(format!("job '{job}': pause at {ts} is outside any session"));
                phase
            }
            (EventKind::Resume, Phase::Paused { .. }) => Phase::Active { since: ts },
            (EventKind::Resume, Phase::Active { since }) => {
                problems.push(format!(
                    "job '{job}': resume at {ts} without a preceding pause (running since {since})"
                ));
                phase
            }
            (EventKind::Resume, Phase::Idle) => {
                problems.push(format!("job '{job}': resume at {ts} is outside any session"));
                phase
            }
            (EventKind::Stop, Phase::Active { .. } | Phase::Paused { .. }) => Phase::Idle,
            (EventKind::Stop, Phase::Idle) => {
                problems.push(format!("job '{job}': stop at {ts} has no matching start"));
                phase
            }
        };
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordError;
    use pretty_assertions::assert_eq;

    fn entry(store: &str, line_index: usize, record: EventRecord) -> LogEntry {
        LogEntry {
            store: store.to_string(),
            line_index,
            raw: record.to_line(),
            parsed: Parsed::Valid(record),
        }
    }

    #[test]
    fn duplicates_across_stores_collapse() {
        let start = EventRecord::start("x", 10);
        let entries = vec![
            entry("canonical", 0, start.clone()),
            entry("mirror", 0, start.clone()),
        ];
        assert_eq!(logical_log(&entries), vec![start]);
    }

    #[test]
    fn near_duplicates_are_distinct() {
        let entries = vec![
            entry("canonical", 0, EventRecord::start("x", 10)),
            entry("mirror", 0, EventRecord::start("x", 11)),
        ];
        assert_eq!(logical_log(&entries).len(), 2);
    }

    #[test]
    fn ties_keep_read_order() {
        let entries = vec![
            entry("canonical", 0, EventRecord::stop("x", 5, None)),
            entry("canonical", 1, EventRecord::start("x", 5)),
            entry("canonical", 2, EventRecord::start("y", 1)),
        ];
        let kinds: Vec<(&str, EventKind)> = logical_log(&entries)
            .iter()
            .map(|e| (if e.job == "x" { "x" } else { "y" }, e.event))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("y", EventKind::Start),
                ("x", EventKind::Stop),
                ("x", EventKind::Start)
            ]
        );
    }

    #[test]
    fn malformed_entries_are_excluded_but_listed() {
        let entries = vec![
            LogEntry {
                store: "canonical".into(),
                line_index: 0,
                raw: "junk".into(),
                parsed: Parsed::Malformed(RecordError::NotJson("junk".into())),
            },
            entry("canonical", 1, EventRecord::start("x", 1)),
        ];
        assert_eq!(logical_log(&entries).len(), 1);
        assert_eq!(malformed(&entries).count(), 1);
    }

    #[test]
    fn occurrences_are_grouped_per_key() {
        let start = EventRecord::start("x", 10);
        let entries = vec![
            entry("canonical", 0, start.clone()),
            entry("canonical", 1, EventRecord::stop("x", 20, Some("t"))),
            entry("mirror", 0, start.clone()),
        ];
        let grouped = group_occurrences(&entries);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].record, start);
        let stores: Vec<&str> = grouped[0]
            .occurrences
            .iter()
            .map(|o| o.store.as_str())
            .collect();
        assert_eq!(stores, vec!["canonical", "mirror"]);
    }

    #[test]
    fn well_formed_sequence_has_no_problems() {
        let events = vec![
            EventRecord::start("x", 1),
            EventRecord::pause("x", 2),
            EventRecord::resume("x", 3),
            EventRecord::pause("x", 4),
            EventRecord::stop("x", 5, None),
            EventRecord::start("x", 6),
        ];
        assert!(validate_ordering("x", &events).is_empty());
    }

    #[test]
    fn every_violation_kind_is_reported() {
        let events = vec![
            EventRecord::stop("x", 1, None),
            EventRecord::pause("x", 2),
            EventRecord::resume("x", 3),
            EventRecord::start("x", 4),
            EventRecord::resume("x", 5),
            EventRecord::pause("x", 6),
            EventRecord::pause("x", 7),
            EventRecord::start("x", 8),
        ];
        assert_eq!(
            validate_ordering("x", &events),
            vec![
                "job 'x': stop at 1 has no matching start",
                "job 'x': pause at 2 is outside any session",
                "job 'x': resume at 3 is outside any session",
                "job 'x': resume at 5 without a preceding pause (running since 4)",
                "job 'x': pause at 7 while already paused since 6",
                "job 'x': start at 8 follows start at 4 with no stop in between",
            ]
        );
    }

    #[test]
    fn other_jobs_do_not_interfere() {
        let events = vec![
            EventRecord::start("x", 1),
            EventRecord::start("y", 2),
            EventRecord::stop("x", 3, None),
        ];
        assert!(validate_ordering("x", &events).is_empty());
    }
}
