//! Applying corrections to logged events.
//!
//! An edit is written first and validated after. Ordering problems found
//! afterwards are returned as warnings; the stores keep what was written.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::model::EventRecord;
use crate::replication::{ReplicatedLog, RewriteReport};
use crate::validate::{Occurrence, logical_log, validate_ordering};

/// Outcome of one or more edits.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EditReport {
    /// One row per store that held at least one targeted occurrence.
    pub rewrites: RewriteReport,
    /// Jobs re-validated against the canonical store.
    pub jobs_checked: Vec<String>,
    /// Ordering violations found after writing. Advisory only.
    pub warnings: Vec<String>,
}

impl EditReport {
    pub fn changed_anything(&self) -> bool {
        self.rewrites.replaced_any()
    }
}

/// A single correction: every stored copy of one logical event, and the
/// record that should replace it.
#[derive(Debug, Clone)]
pub struct EventEdit {
    pub occurrences: Vec<Occurrence>,
    pub new_record: EventRecord,
}

/// Rewrite each occurrence in its own store, then validate the affected
/// jobs. Stores that lack the occurrence are reported as not found.
pub fn apply_edit(
    log: &ReplicatedLog,
    occurrences: &[Occurrence],
    new_record: &EventRecord,
) -> Result<EditReport> {
    apply_edits(
        log,
        &[EventEdit {
            occurrences: occurrences.to_vec(),
            new_record: new_record.clone(),
        }],
    )
}

/// Apply edits in order and validate every touched job once at the end.
pub fn apply_edits(log: &ReplicatedLog, edits: &[EventEdit]) -> Result<EditReport> {
    let mut report = EditReport::default();
    let mut touched: BTreeSet<String> = BTreeSet::new();

    for edit in edits {
        touched.insert(edit.new_record.job.clone());
        for occurrence in &edit.occurrences {
            if let Ok(old) = EventRecord::parse_line(&occurrence.raw) {
                touched.insert(old.job);
            }
            report.rewrites.merge(log.rewrite_in(
                &occurrence.store,
                &occurrence.raw,
                &edit.new_record,
            ));
        }
    }

    if !report.changed_anything() {
        tracing::info!("edit matched no stored line");
    }

    let canonical = log
        .read_canonical()
        .context("failed to re-read the canonical log after editing")?;
    let events = logical_log(&canonical);
    for job in touched {
        let problems = validate_ordering(&job, &events);
        for problem in &problems {
            tracing::warn!(job = %job, "{problem}");
        }
        report.warnings.extend(problems);
        report.jobs_checked.push(job);
    }
    Ok(report)
}
