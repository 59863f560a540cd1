use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::model::EventKind;
use crate::sessions::RangePreset;

/// Event-sourced personal work timer.
#[derive(Parser)]
#[command(name = "timescope", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Canonical storage directory.
    #[arg(long, global = true, env = "TIMESCOPE_DIR")]
    pub dir: Option<PathBuf>,

    /// Workspace root; its `.timescope/logs.jsonl` is kept as a mirror.
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Do not read or write any mirror store.
    #[arg(long, global = true)]
    pub no_mirror: bool,

    /// Path to config.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output structured JSON lines to stdout.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print JSON Schema for a log record.
    Schema,
    /// Interactive timer reading commands from stdin.
    Run(RunArgs),
    /// Manage the job registry.
    Jobs(JobsArgs),
    /// List reconstructed sessions.
    Sessions(SessionsArgs),
    /// Show logged events and where each copy is stored.
    Log(LogArgs),
    /// Correct one logged event in every store that holds it.
    Edit(EditArgs),
    /// Report ordering problems in the canonical log.
    Check(CheckArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Elapsed display refresh interval (e.g. `1s`, `500ms`).
    #[arg(long, value_parser = humantime::parse_duration)]
    pub refresh: Option<Duration>,
}

#[derive(Args, Debug, Clone)]
pub struct JobsArgs {
    #[command(subcommand)]
    pub action: JobsAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum JobsAction {
    /// List registered jobs.
    List,
    /// Register a new job.
    Add { name: String },
    /// Rename a job everywhere it is logged.
    Rename { old: String, new: String },
    /// Remove a job from the registry; logged events are kept.
    Delete { name: String },
}

#[derive(Args, Debug, Clone, Default)]
pub struct SessionsArgs {
    /// Only these jobs (repeatable).
    #[arg(long = "job")]
    pub jobs: Vec<String>,

    /// Named date range.
    #[arg(long, value_enum, conflicts_with_all = ["from", "to"])]
    pub range: Option<RangePreset>,

    /// First local day (YYYY-MM-DD).
    #[arg(long, requires = "to")]
    pub from: Option<NaiveDate>,

    /// Last local day (YYYY-MM-DD), inclusive.
    #[arg(long, requires = "from")]
    pub to: Option<NaiveDate>,

    /// Print per-job and per-day totals instead of sessions.
    #[arg(long)]
    pub summary: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct LogArgs {
    /// Only events of this job.
    #[arg(long)]
    pub job: Option<String>,

    /// List lines that failed to parse instead.
    #[arg(long)]
    pub malformed: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EditArgs {
    /// Event kind of the target.
    #[arg(long, value_enum, required_unless_present = "line")]
    pub event: Option<EventKind>,

    /// Job of the target.
    #[arg(long, required_unless_present = "line")]
    pub job: Option<String>,

    /// Timestamp (ms) of the target.
    #[arg(long, required_unless_present = "line", allow_negative_numbers = true)]
    pub timestamp: Option<i64>,

    /// Target a stored line directly, as STORE:INDEX (see `log`).
    #[arg(long, conflicts_with_all = ["event", "job", "timestamp"])]
    pub line: Option<String>,

    #[arg(long, value_enum)]
    pub set_event: Option<EventKind>,

    #[arg(long)]
    pub set_job: Option<String>,

    #[arg(long, allow_negative_numbers = true)]
    pub set_timestamp: Option<i64>,

    /// New task note for a stop; an empty string clears it.
    #[arg(long)]
    pub set_task: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CheckArgs {
    /// Only this job.
    #[arg(long)]
    pub job: Option<String>,
}
