//! # tickloom
//!
//! Entry point for the tickloom command-line tool.
//!
//! ## Run sequence
//!
//! 1. **Tracing** - registry + fmt layer filtered by `RUST_LOG` or `--log-level`
//! 2. **Config** - TOML file (optional) validated into a `RuntimeConfig`
//! 3. **Runtime** - event bus, state, worker pool, agents and tick loop
//! 4. **Signals** - SIGINT/SIGTERM request a cooperative stop
//! 5. **Shutdown** - loop goes STOPPING -> STOPPED, then queued work drains

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tickloom::cli::Cli;
use tickloom::commands::execute_command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    execute_command(cli.command).await
}

/// Initialize tracing subscriber with environment filter.
///
/// `RUST_LOG` wins over `--log-level`, which wins over the `info` default.
/// Logs go to stderr so command output on stdout stays parseable.
fn init_tracing(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
