//! Command-line interface for episode-forge.
//!
//! Provides the service, the conversion worker and operator diagnostics.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
