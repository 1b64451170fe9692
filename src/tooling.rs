//! Tooling & Integration Layer
//!
//! CLI commands and their text/JSON output.

pub mod cli;
mod format;

pub use cli::{Cli, CliContext, Commands, ConfigCommands};
pub use format::IndexStatus;
