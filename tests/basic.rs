use anyhow::Result;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use timescope::config::Paths;
use timescope::model::{EventKind, EventRecord};
use timescope::replication::{CANONICAL, MIRROR};
use timescope::sessions::{SessionFilter, build_sessions, reconstruct};
use timescope::timer::Rejected;
use timescope::tracker::{Outcome, Rejection, Tracker};
use timescope::validate::logical_log;

fn mirrored(root: &Path) -> Tracker {
    Tracker::open(&Paths::in_dir(root.join("global"), Some(&root.join("project"))))
}

#[test]
fn test_round_trip_every_kind() -> Result<()> {
    let records = [
        EventRecord::start("build", 1_700_000_000_000),
        EventRecord::pause("build", 1_700_000_001_000),
        EventRecord::resume("build", 1_700_000_002_000),
        EventRecord::stop("build", 1_700_000_003_000, Some("shipped \"v2\"")),
        EventRecord::stop("build", 1_700_000_004_000, None),
    ];
    for record in records {
        assert_eq!(EventRecord::parse_line(&record.to_line())?, record);
    }
    Ok(())
}

#[test]
fn test_foreign_formatting_is_accepted() -> Result<()> {
    let line = r#"  { "timestamp" : "42", "job":"x",   "event":"STOP" }  "#;
    let record = EventRecord::parse_line(line)?;
    assert_eq!(record, EventRecord::stop("x", 42, None));
    Ok(())
}

#[test]
fn test_dedup_across_stores() -> Result<()> {
    let dir = tempdir()?;
    let tracker = mirrored(dir.path());
    let record = EventRecord::start("x", 10);
    let report = tracker.log().append(&record)?;
    assert!(report.succeeded(CANONICAL));
    assert!(report.succeeded(MIRROR));

    let entries = tracker.entries()?;
    assert_eq!(entries.len(), 2);
    assert_eq!(logical_log(&entries), vec![record]);
    Ok(())
}

#[test]
fn test_pause_resume_accounting() -> Result<()> {
    let dir = tempdir()?;
    let mut tracker = mirrored(dir.path());
    tracker.start_at("X", 1000)?;
    tracker.pause_at(1500)?;
    tracker.resume_at(2000)?;
    tracker.stop_at(None, 3000)?;

    let sessions = tracker.list_sessions(&SessionFilter::default())?;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].start, 1000);
    assert_eq!(sessions[0].stop, 3000);
    assert_eq!(sessions[0].duration_ms, 1500);
    assert_eq!(sessions[0].pauses, 1);
    Ok(())
}

#[test]
fn test_dangling_start_recovery() {
    let events = vec![EventRecord::start("X", 0), EventRecord::start("X", 500)];
    let rebuilt = reconstruct(&events);
    assert_eq!(rebuilt.sessions.len(), 1);
    assert_eq!(rebuilt.sessions[0].start, 0);
    assert_eq!(rebuilt.sessions[0].stop, 500);
    assert_eq!(rebuilt.sessions[0].duration_ms, 500);
    assert_eq!(rebuilt.open.len(), 1);
    assert_eq!(rebuilt.open[0].start, 500);

    let mut closed = events.clone();
    closed.push(EventRecord::stop("X", 800, None));
    let sessions = build_sessions(&closed);
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[1].duration_ms, 300);
}

#[test]
fn test_invalid_transition_appends_nothing() -> Result<()> {
    let dir = tempdir()?;
    let mut tracker = mirrored(dir.path());
    let outcome = tracker.pause_at(5)?;
    assert_eq!(
        outcome.rejection(),
        Some(&Rejection::Transition(Rejected::NotRunning))
    );
    assert!(tracker.timer().is_idle());
    assert!(tracker.entries()?.is_empty());
    assert!(!dir.path().join("global/logs.jsonl").exists());
    Ok(())
}

#[test]
fn test_idempotent_rename() -> Result<()> {
    let dir = tempdir()?;
    let mut tracker = mirrored(dir.path());
    tracker.add_job("A")?;
    tracker.add_job("other")?;
    tracker.start_at("A", 1)?;
    tracker.stop_at(Some("first pass"), 2)?;
    tracker.start_at("other", 3)?;
    tracker.stop_at(None, 4)?;

    let canonical = dir.path().join("global/logs.jsonl");
    let mirror = dir.path().join("project/.timescope/logs.jsonl");
    let registry = dir.path().join("global/jobs.json");
    let before = (
        fs::read_to_string(&canonical)?,
        fs::read_to_string(&mirror)?,
        fs::read_to_string(&registry)?,
    );

    assert!(tracker.rename_job("A", "B")?.is_applied());
    assert!(fs::read_to_string(&canonical)?.contains(r#""job":"B""#));
    assert!(tracker.rename_job("B", "A")?.is_applied());

    let after = (
        fs::read_to_string(&canonical)?,
        fs::read_to_string(&mirror)?,
        fs::read_to_string(&registry)?,
    );
    assert_eq!(after, before);
    Ok(())
}

#[test]
fn test_edit_revalidation_keeps_the_write() -> Result<()> {
    let dir = tempdir()?;
    let mut tracker = mirrored(dir.path());
    tracker.start_at("X", 1000)?;
    tracker.stop_at(None, 2000)?;

    let stop = tracker
        .logical_events()?
        .into_iter()
        .find(|e| e.record.event == EventKind::Stop)
        .expect("stop was logged");
    assert_eq!(stop.occurrences.len(), 2);

    let early = EventRecord::stop("X", 900, None);
    let Outcome::Applied { detail, view } = tracker.edit_event(&stop.occurrences, &early)? else {
        panic!("edit rejected");
    };
    assert!(detail.rewrites.canonical_replaced());
    assert!(detail.rewrites.mirror_replaced());
    assert!(!detail.warnings.is_empty());
    assert!(view.sessions.is_empty());

    let stored = logical_log(&tracker.log().read_canonical()?);
    assert!(stored.contains(&early));
    Ok(())
}

#[test]
fn test_multi_store_partial_rewrite() -> Result<()> {
    let dir = tempdir()?;
    let tracker = mirrored(dir.path());
    let canonical_only = EventRecord::start("X", 10);
    tracker.log().canonical().file.append(&canonical_only)?;

    let report = tracker
        .log()
        .rewrite_line(&canonical_only.to_line(), &EventRecord::start("X", 11));
    assert!(report.canonical_replaced());
    assert!(!report.mirror_replaced());
    Ok(())
}

#[test]
fn test_malformed_lines_do_not_block_sessions() -> Result<()> {
    let dir = tempdir()?;
    let log = dir.path().join("global/logs.jsonl");
    fs::create_dir_all(log.parent().expect("has parent"))?;
    fs::write(
        &log,
        [
            EventRecord::start("X", 1).to_line().as_str(),
            "{broken",
            r#"{"event":"teleport","job":"X","timestamp":2}"#,
            "",
            EventRecord::stop("X", 5, None).to_line().as_str(),
        ]
        .join("\n"),
    )?;
    let tracker = Tracker::open(&Paths::in_dir(dir.path().join("global"), None));

    let entries = tracker.entries()?;
    assert_eq!(entries.len(), 4);
    let sessions = tracker.list_sessions(&SessionFilter::default())?;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].duration_ms, 4);
    Ok(())
}

#[test]
fn test_undecodable_line_does_not_block_the_store() -> Result<()> {
    let dir = tempdir()?;
    let log = dir.path().join("global/logs.jsonl");
    fs::create_dir_all(log.parent().expect("has parent"))?;
    let mut bytes = Vec::new();
    bytes.extend_from_slice(EventRecord::start("X", 1).to_line().as_bytes());
    bytes.extend_from_slice(b"\n\xff\xfe garbage\n");
    bytes.extend_from_slice(EventRecord::stop("X", 5, None).to_line().as_bytes());
    bytes.push(b'\n');
    fs::write(&log, &bytes)?;
    let mut tracker = Tracker::open(&Paths::in_dir(dir.path().join("global"), None));

    let sessions = tracker.list_sessions(&SessionFilter::default())?;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].duration_ms, 4);

    tracker.add_job("X")?;
    assert!(tracker.rename_job("X", "Y")?.is_applied());
    let start = EventRecord::start("Y", 1).to_line();
    let stop = EventRecord::stop("Y", 5, None).to_line();
    let expected: [&[u8]; 4] = [
        start.as_bytes(),
        b"\n\xff\xfe garbage\n",
        stop.as_bytes(),
        b"\n",
    ];
    assert_eq!(fs::read(&log)?, expected.concat());
    Ok(())
}

#[test]
fn test_schema_generation() {
    let schema = timescope::model::generate_schema();
    assert!(schema.contains("$schema"));
    assert!(schema.contains("timestamp"));
}
