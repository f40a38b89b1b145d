//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// tickloom - priority work queue, worker pool and agent tick loop
#[derive(Parser, Debug)]
#[command(name = "tickloom")]
#[command(version)]
#[command(about = "Run cooperative agents on a fixed tick with a prioritized worker pool")]
#[command(
    long_about = "tickloom drives a set of agents on a fixed tick interval, selecting which agents run each tick with a pluggable scheduling strategy, while a bounded worker pool executes prioritized background work."
)]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set (e.g. "debug", "orchestrator=trace")
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the demo agents until Ctrl-C or a tick limit
    Run {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Stop after this many ticks
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Abandon queued work on shutdown instead of draining it
        #[arg(long, default_value_t = false)]
        no_drain: bool,

        /// Submit a background work item every N counter ticks (0 disables)
        #[arg(long, default_value_t = 5)]
        submit_every: u64,
    },

    /// Validate a configuration file and print the effective settings
    CheckConfig {
        /// TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// List the available scheduling strategies
    Strategies,
}
