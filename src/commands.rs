//! CLI command handlers.
//!
//! Handlers return `anyhow::Result` and print machine-readable JSON on
//! stdout; diagnostics go through `tracing` on stderr.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use orchestrator::runtime::LoopSummary;
use orchestrator::scheduler::available_strategies;
use orchestrator::work::WorkStats;
use orchestrator::{Runtime, RuntimeConfig, StopSignal, install_signal_handlers};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::Commands;
use crate::demo::{COUNTER_KEY, CounterAgent, HeartbeatAgent, PULSES_KEY};

/// Execute a CLI command.
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            config,
            ticks,
            no_drain,
            submit_every,
        } => {
            let options = RunOptions {
                config,
                ticks,
                drain: !no_drain,
                submit_every,
            };
            let report = cmd_run(&options).await?;
            print_json(&report)
        }
        Commands::CheckConfig { config } => {
            let text = cmd_check_config(&config)?;
            println!("{text}");
            Ok(())
        }
        Commands::Strategies => print_json(&available_strategies()),
    }
}

/// Options for [`cmd_run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: Option<PathBuf>,
    pub ticks: Option<u64>,
    pub drain: bool,
    pub submit_every: u64,
}

/// Summary printed when `run` finishes.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub ticks: u64,
    pub stop_reason: Option<String>,
    pub counter: Option<serde_json::Value>,
    pub pulses: Option<serde_json::Value>,
    pub work: WorkCounts,
    pub abandoned: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkCounts {
    pub done: usize,
    pub error: usize,
    pub cancelled: usize,
    pub queued: usize,
}

impl From<WorkStats> for WorkCounts {
    fn from(stats: WorkStats) -> Self {
        Self {
            done: stats.done,
            error: stats.error,
            cancelled: stats.cancelled,
            queued: stats.queued,
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    path.map_or_else(
        || Ok(RuntimeConfig::default()),
        |path| {
            RuntimeConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        },
    )
}

/// Run the demo agents until a signal arrives or the tick limit is reached.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the runtime fails to
/// start or shut down.
pub async fn cmd_run(options: &RunOptions) -> Result<RunReport> {
    let started = Instant::now();
    let config = load_config(options.config.as_deref())?;

    let stop = StopSignal::new();
    let runtime = Runtime::with_stop_signal(config, stop.clone()).context("Invalid runtime")?;
    runtime.register(Box::new(HeartbeatAgent::new())).await?;
    runtime
        .register(Box::new(CounterAgent::new(options.submit_every)))
        .await?;

    let signals = install_signal_handlers(stop.clone());
    info!(ticks = ?options.ticks, "tickloom running. Press Ctrl+C to stop.");

    let summary: LoopSummary = match options.ticks {
        Some(ticks) => runtime.run_for(ticks).await?,
        None => runtime.run().await?,
    };
    if !summary.started.is_clean() {
        warn!(failed = ?summary.started.failed, "Some agents failed to start");
    }

    let shutdown = runtime
        .shutdown(options.drain)
        .await
        .context("Runtime shutdown failed")?;
    stop.trigger(orchestrator::StopReason::Programmatic);
    if let Err(error) = signals.await {
        warn!(%error, "Signal listener ended abnormally");
    }

    let state = runtime.state();
    let report = RunReport {
        ticks: summary.ticks,
        stop_reason: summary.stop_reason.map(|reason| reason.to_string()),
        counter: state.get(COUNTER_KEY).await,
        pulses: state.get(PULSES_KEY).await,
        work: runtime.orchestrator().stats().into(),
        abandoned: shutdown.work.abandoned,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    };
    info!(
        ticks = report.ticks,
        done = report.work.done,
        abandoned = report.abandoned,
        "tickloom stopped gracefully"
    );
    Ok(report)
}

/// Validate a configuration file and render the effective settings as TOML.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn cmd_check_config(path: &Path) -> Result<String> {
    let config = load_config(Some(path))?;
    config.validate().context("Configuration rejected")?;
    Ok(config.to_toml_string()?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{text}");
    Ok(())
}
