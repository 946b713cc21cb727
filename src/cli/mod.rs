//! CLI module for toolstore
//!
//! Provides a command-line interface over the data facade:
//! - init: write a configuration and create the database
//! - save/load/delete/keys/find: single-store operations
//! - export/import: bundles
//! - migrate/info/clear/compact: maintenance

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{run, run_command, Session};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
