//! Command-line interface for varpipe.
//!
//! Provides the long-running dispatch service plus standalone extraction
//! commands for re-parsing tool reports.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
