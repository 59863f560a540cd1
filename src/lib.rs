//! Event-sourced personal work timer.
//!
//! Timer transitions are appended as JSON lines to a canonical log and any
//! number of mirror logs. Sessions are rebuilt on demand from the
//! deduplicated union of every store.

pub mod cli;
pub mod config;
pub mod edit;
pub mod engine;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod jobs;
pub mod journal;
pub mod model;
pub mod replication;
pub mod reporter;
pub mod sessions;
pub mod timer;
pub mod tracker;
pub mod validate;
