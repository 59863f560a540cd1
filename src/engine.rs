use anyhow::{Context, Result, bail};
use chrono::Local;
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Instant;

use crate::cli::{CheckArgs, EditArgs, GlobalArgs, JobsAction, JobsArgs, LogArgs, RunArgs, SessionsArgs};
use crate::config::{Config, Overrides};
use crate::events::Event;
use crate::exit_codes::exit;
use crate::journal::{LogEntry, Parsed};
use crate::model::{EventKind, EventRecord};
use crate::reporter::Reporter;
use crate::sessions::{SessionFilter, daily_totals, totals_by_job};
use crate::timer::Ticker;
use crate::tracker::{Outcome, Rejection, Tracker, Transitioned, now_ms};
use crate::validate::{self, Occurrence, group_occurrences};

/// Load configuration and open the stores it points at.
pub fn open_tracker(global: &GlobalArgs) -> Result<(Config, Tracker)> {
    let config = Config::load(global.config.as_deref())?;
    let paths = config.resolve(&Overrides {
        dir: global.dir.clone(),
        workspace: global.workspace.clone(),
        no_mirror: global.no_mirror,
    })?;
    tracing::debug!(
        log = %paths.log.display(),
        mirrors = paths.mirrors.len(),
        "resolved storage"
    );
    Ok((config, Tracker::open(&paths)))
}

fn report_rejection(reporter: &mut Reporter, rejection: &Rejection) -> i32 {
    reporter.record(Event::Rejected {
        reason: rejection.to_string(),
    });
    exit::REJECTED
}

fn report_transition(reporter: &mut Reporter, outcome: Outcome<Transitioned>) -> i32 {
    let detail = match outcome {
        Outcome::Applied { detail, .. } => detail,
        Outcome::Rejected(rejection) => return report_rejection(reporter, &rejection),
    };
    let record = detail.record;
    reporter.record(Event::Transition {
        event: record.event,
        job: record.job,
        timestamp: record.timestamp,
        elapsed_ms: detail.elapsed_ms,
        task: record.task,
    });
    for failure in detail.writes.failures() {
        reporter.record(Event::StoreFailure {
            store: failure.store.clone(),
            error: failure.error.clone().unwrap_or_default(),
        });
    }
    exit::SUCCESS
}

pub fn jobs(global: &GlobalArgs, args: JobsArgs) -> Result<i32> {
    let mut reporter = Reporter::new(global.json);
    let (_, mut tracker) = open_tracker(global)?;

    let code = match args.action {
        JobsAction::List => {
            for name in tracker.list_jobs()? {
                reporter.record(Event::Job { name });
            }
            exit::SUCCESS
        }
        JobsAction::Add { name } => match tracker.add_job(&name)? {
            Outcome::Applied { detail, .. } => {
                reporter.record(Event::JobAdded { job: detail });
                exit::SUCCESS
            }
            Outcome::Rejected(rejection) => report_rejection(&mut reporter, &rejection),
        },
        JobsAction::Rename { old, new } => match tracker.rename_job(&old, &new)? {
            Outcome::Applied { detail, .. } => {
                reporter.record(Event::JobRenamed {
                    old,
                    new: new.trim().to_string(),
                    records: detail.total(),
                });
                exit::SUCCESS
            }
            Outcome::Rejected(rejection) => report_rejection(&mut reporter, &rejection),
        },
        JobsAction::Delete { name } => match tracker.delete_job(&name)? {
            Outcome::Applied { detail, .. } => {
                reporter.record(Event::JobDeleted { job: detail });
                exit::SUCCESS
            }
            Outcome::Rejected(rejection) => report_rejection(&mut reporter, &rejection),
        },
    };
    Ok(code)
}

pub fn sessions(global: &GlobalArgs, args: SessionsArgs) -> Result<i32> {
    let mut reporter = Reporter::new(global.json);
    let (_, tracker) = open_tracker(global)?;

    let range = match (args.from, args.to) {
        (Some(from), Some(to)) => {
            if from > to {
                bail!("--from {from} is after --to {to}");
            }
            Some((from, to))
        }
        _ => args
            .range
            .and_then(|preset| preset.resolve(Local::now().date_naive())),
    };
    let filter = SessionFilter {
        jobs: args.jobs.into_iter().collect(),
        range,
    };
    let sessions = tracker.list_sessions(&filter)?;

    if args.summary {
        for (job, total_ms) in totals_by_job(&sessions) {
            reporter.record(Event::JobTotal { job, total_ms });
        }
        for (day, jobs) in daily_totals(&sessions) {
            for (job, total_ms) in jobs {
                reporter.record(Event::DayTotal { day, job, total_ms });
            }
        }
    } else {
        for session in sessions {
            reporter.record(Event::Session(session));
        }
    }
    Ok(exit::SUCCESS)
}

pub fn log(global: &GlobalArgs, args: LogArgs) -> Result<i32> {
    let mut reporter = Reporter::new(global.json);
    let (_, tracker) = open_tracker(global)?;
    let entries = tracker.entries()?;

    if args.malformed {
        for entry in validate::malformed(&entries) {
            if let Parsed::Malformed(err) = &entry.parsed {
                reporter.record(Event::Malformed {
                    store: entry.store.clone(),
                    line_index: entry.line_index,
                    raw: entry.raw.clone(),
                    error: err.to_string(),
                });
            }
        }
        return Ok(exit::SUCCESS);
    }

    for logical in group_occurrences(&entries) {
        if args.job.as_ref().is_some_and(|job| *job != logical.record.job) {
            continue;
        }
        reporter.record(Event::LoggedEvent {
            event: logical.record.event,
            job: logical.record.job,
            timestamp: logical.record.timestamp,
            task: logical.record.task,
            occurrences: logical.occurrences,
        });
    }
    Ok(exit::SUCCESS)
}

/// The logical event an edit applies to.
struct EditTarget {
    /// `None` when the target is a malformed line.
    original: Option<EventRecord>,
    occurrences: Vec<Occurrence>,
}

/// `STORE:INDEX`, as printed by `log`.
fn find_by_line(entries: &[LogEntry], locator: &str) -> Result<Option<EditTarget>> {
    let (store, index) = locator
        .rsplit_once(':')
        .with_context(|| format!("--line `{locator}` is not STORE:INDEX"))?;
    let index: usize = index
        .trim()
        .parse()
        .with_context(|| format!("bad line index in `{locator}`"))?;
    let Some(entry) = entries
        .iter()
        .find(|e| e.store == store && e.line_index == index)
    else {
        return Ok(None);
    };
    let target = match entry.record() {
        Some(record) => {
            let key = record.dedup_key();
            EditTarget {
                original: Some(record.clone()),
                occurrences: entries
                    .iter()
                    .filter(|e| e.record().is_some_and(|r| r.dedup_key() == key))
                    .map(Occurrence::from)
                    .collect(),
            }
        }
        None => EditTarget {
            original: None,
            occurrences: vec![entry.into()],
        },
    };
    Ok(Some(target))
}

fn find_by_identity(
    entries: &[LogEntry],
    event: EventKind,
    job: &str,
    timestamp: i64,
) -> Result<Option<EditTarget>> {
    let mut matches: Vec<_> = group_occurrences(entries)
        .into_iter()
        .filter(|e| e.record.event == event && e.record.job == job && e.record.timestamp == timestamp)
        .collect();
    if matches.len() > 1 {
        bail!(
            "{} logged events share that event, job and timestamp; pick one with --line",
            matches.len()
        );
    }
    Ok(matches.pop().map(|logical| EditTarget {
        original: Some(logical.record),
        occurrences: logical.occurrences,
    }))
}

pub fn edit(global: &GlobalArgs, args: EditArgs) -> Result<i32> {
    let mut reporter = Reporter::new(global.json);
    let (_, mut tracker) = open_tracker(global)?;
    let entries = tracker.entries()?;

    let (target, label) = match &args.line {
        Some(locator) => (find_by_line(&entries, locator)?, locator.clone()),
        None => {
            let (Some(event), Some(job), Some(timestamp)) =
                (args.event, args.job.as_deref(), args.timestamp)
            else {
                bail!("an edit needs --line or all of --event, --job and --timestamp");
            };
            (
                find_by_identity(&entries, event, job, timestamp)?,
                format!("{event} '{job}' at {timestamp}"),
            )
        }
    };
    let Some(target) = target else {
        reporter.record(Event::NothingMatched { target: label });
        return Ok(exit::NOTHING_MATCHED);
    };

    let original = target.original.as_ref();
    let event = args
        .set_event
        .or(original.map(|r| r.event))
        .context("a malformed line needs --set-event")?;
    let job = args
        .set_job
        .clone()
        .or_else(|| original.map(|r| r.job.clone()))
        .context("a malformed line needs --set-job")?;
    let timestamp = args
        .set_timestamp
        .or(original.map(|r| r.timestamp))
        .context("a malformed line needs --set-timestamp")?;
    let task = match &args.set_task {
        Some(task) => Some(task.clone()),
        None => original.and_then(|r| r.task.clone()),
    };
    if job.trim().is_empty() {
        return Ok(report_rejection(&mut reporter, &Rejection::EmptyJobName));
    }
    let new_record = EventRecord::new(event, job.trim(), timestamp, task)?;

    let report = match tracker.edit_event(&target.occurrences, &new_record)? {
        Outcome::Applied { detail, .. } => detail,
        Outcome::Rejected(rejection) => return Ok(report_rejection(&mut reporter, &rejection)),
    };
    if !report.changed_anything() {
        reporter.record(Event::NothingMatched { target: label });
        return Ok(exit::NOTHING_MATCHED);
    }
    reporter.record(Event::EditApplied {
        stores: report.rewrites.stores,
    });
    if report.warnings.is_empty() {
        return Ok(exit::SUCCESS);
    }
    for message in report.warnings {
        reporter.record(Event::ValidationWarning { message });
    }
    Ok(exit::ORDERING_WARNINGS)
}

pub fn check(global: &GlobalArgs, args: CheckArgs) -> Result<i32> {
    let mut reporter = Reporter::new(global.json);
    let (_, tracker) = open_tracker(global)?;
    let report = tracker.check(args.job.as_deref())?;
    if report.problems.is_empty() {
        reporter.record(Event::CheckPassed {
            jobs: report.jobs.len(),
        });
        return Ok(exit::SUCCESS);
    }
    for message in report.problems {
        reporter.record(Event::ValidationWarning { message });
    }
    Ok(exit::ORDERING_WARNINGS)
}

const HELP: &str = "commands: start <job> | pause | resume | stop [note] | status | jobs | sessions | help | quit";

/// One line typed into the interactive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopCommand {
    Start(String),
    Pause,
    Resume,
    Stop(Option<String>),
    Status,
    Jobs,
    Sessions,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl LoopCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        match word.to_ascii_lowercase().as_str() {
            "" => LoopCommand::Empty,
            "start" => LoopCommand::Start(rest.to_string()),
            "pause" => LoopCommand::Pause,
            "resume" => LoopCommand::Resume,
            "stop" => LoopCommand::Stop((!rest.is_empty()).then(|| rest.to_string())),
            "status" => LoopCommand::Status,
            "jobs" => LoopCommand::Jobs,
            "sessions" => LoopCommand::Sessions,
            "help" | "?" => LoopCommand::Help,
            "quit" | "exit" => LoopCommand::Quit,
            _ => LoopCommand::Unknown(line.to_string()),
        }
    }
}

pub fn run(global: &GlobalArgs, args: RunArgs) -> Result<i32> {
    let (config, mut tracker) = open_tracker(global)?;
    let interval = match args.refresh {
        Some(interval) => interval,
        None => config.refresh_interval()?,
    };
    let mut reporter = Reporter::new(global.json);
    if !global.json {
        reporter.record(Event::Info {
            message: HELP.to_string(),
        });
    }
    Ok(run_loop(
        &mut tracker,
        &mut reporter,
        Ticker::new(interval),
        spawn_stdin_reader(),
    ))
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Drive the live timer from `lines` until `quit` or the sender hangs up.
///
/// While a job is active the ticker bounds each wait so the elapsed display
/// refreshes on schedule. Live state is dropped on exit; nothing is logged.
pub fn run_loop(
    tracker: &mut Tracker,
    reporter: &mut Reporter,
    mut ticker: Ticker,
    lines: Receiver<String>,
) -> i32 {
    let mut code = exit::SUCCESS;
    loop {
        let line = match ticker.timeout(Instant::now()) {
            Some(wait) => match lines.recv_timeout(wait) {
                Ok(line) => Some(line),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match lines.recv() {
                Ok(line) => Some(line),
                Err(_) => break,
            },
        };

        if let Some(line) = line {
            let command = LoopCommand::parse(&line);
            if command == LoopCommand::Quit {
                break;
            }
            if let Err(err) = dispatch(tracker, reporter, &mut ticker, command) {
                tracing::error!(error = %err, "command failed");
                reporter.record(Event::Error {
                    message: format!("{err:#}"),
                });
                code = exit::OPERATIONAL_FAILURE;
            }
        }

        if ticker.fire(Instant::now()) {
            let timer = tracker.timer();
            if let Some(job) = timer.current_job() {
                reporter.record(Event::Tick {
                    job: job.to_string(),
                    paused: timer.is_paused(),
                    elapsed_ms: timer.elapsed_ms(now_ms()),
                });
            }
        }
    }
    ticker.cancel();
    if let Some(job) = tracker.timer().current_job() {
        tracing::info!(job, "exiting with an active job; it stays open in the log");
    }
    code
}

fn dispatch(
    tracker: &mut Tracker,
    reporter: &mut Reporter,
    ticker: &mut Ticker,
    command: LoopCommand,
) -> Result<()> {
    match command {
        LoopCommand::Start(job) => {
            let outcome = tracker.start(&job)?;
            if outcome.is_applied() {
                ticker.arm(Instant::now());
            }
            report_transition(reporter, outcome);
        }
        LoopCommand::Pause => {
            report_transition(reporter, tracker.pause()?);
        }
        LoopCommand::Resume => {
            report_transition(reporter, tracker.resume()?);
        }
        LoopCommand::Stop(note) => {
            let outcome = tracker.stop(note.as_deref())?;
            if outcome.is_applied() {
                ticker.cancel();
            }
            report_transition(reporter, outcome);
        }
        LoopCommand::Status => {
            let timer = tracker.timer();
            reporter.record(Event::Status {
                timer: timer.state().clone(),
                elapsed_ms: timer.elapsed_ms(now_ms()),
            });
        }
        LoopCommand::Jobs => {
            for name in tracker.list_jobs()? {
                reporter.record(Event::Job { name });
            }
        }
        LoopCommand::Sessions => {
            for session in tracker.list_sessions(&SessionFilter::default())? {
                reporter.record(Event::Session(session));
            }
        }
        LoopCommand::Help => reporter.record(Event::Info {
            message: HELP.to_string(),
        }),
        LoopCommand::Unknown(text) => reporter.record(Event::Rejected {
            reason: format!("unknown command `{text}`; try `help`"),
        }),
        LoopCommand::Quit | LoopCommand::Empty => {}
    }
    Ok(())
}
