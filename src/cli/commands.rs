use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agent-hub")]
#[command(author, version, about = "Agent task scheduler and message bus", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config.toml (defaults apply when the file is missing)
    #[arg(long, global = true, env = "AGENT_HUB_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a demo echo agent, submit tasks, and print completion reports
    Run {
        /// Number of tasks to submit
        #[arg(short, long, default_value_t = 8)]
        tasks: usize,

        /// Give up waiting for reports after this many seconds
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Write the default configuration to a file
    Init {
        /// Destination file
        #[arg(default_value = "agent-hub.toml")]
        path: PathBuf,
    },
}
