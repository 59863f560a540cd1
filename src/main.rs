//! `timescope` - event-sourced personal work timer.
//!
//! See `DESIGN.md` for architecture.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use timescope::cli::{Cli, Command};

fn init_logging() {
    let debug_enabled = std::env::var("TIMESCOPE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("TIMESCOPE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let global = cli.global;
    let exit_code = match cli.command {
        Command::Schema => {
            let schema = timescope::model::generate_schema();
            println!("{}", schema);
            0
        }
        Command::Run(args) => timescope::engine::run(&global, args)?,
        Command::Jobs(args) => timescope::engine::jobs(&global, args)?,
        Command::Sessions(args) => timescope::engine::sessions(&global, args)?,
        Command::Log(args) => timescope::engine::log(&global, args)?,
        Command::Edit(args) => timescope::engine::edit(&global, args)?,
        Command::Check(args) => timescope::engine::check(&global, args)?,
    };
    std::process::exit(exit_code);
}
