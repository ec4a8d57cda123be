//! Command-line interface definitions for the `agent-hub` binary.

mod commands;

pub use commands::{Cli, Commands, ConfigAction};
