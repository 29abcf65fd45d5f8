//! Command-line interface for agent-harvest.
//!
//! Provides one command per pipeline stage plus `status`.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
