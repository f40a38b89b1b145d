//! Periodic driver that ticks the agents chosen by the scheduler.
//!
//! State machine: `Initializing -> Running -> Stopping -> Stopped`. No
//! transition is skipped, even when the stop signal fires before the first
//! tick. Ticks never overlap: tick `n` finishes, including event delivery,
//! before tick `n + 1` starts. Late ticks are delayed rather than bursted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tickloom_events::{Event, EventBus};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::agents::{AgentManager, LifecycleReport, TickOutcome};
use crate::config::LoopConfig;
use crate::scheduler::Scheduler;
use crate::shutdown::{StopReason, StopSignal};
use crate::{Error, Result};

/// Event published after every tick.
pub const TICK_EVENT: &str = "loop.tick";

/// Event source used by the loop.
pub const LOOP_EVENT_SOURCE: &str = "loop";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Initializing,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// What happened on one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub selected: Vec<String>,
    pub failed: Vec<String>,
    pub events_delivered: usize,
    pub duration: Duration,
}

/// Outcome of a completed [`LoopController::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSummary {
    pub ticks: u64,
    pub started: LifecycleReport,
    pub shut_down: LifecycleReport,
    pub stop_reason: Option<StopReason>,
}

/// Cloneable view of a running loop.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    stop: StopSignal,
    state: watch::Receiver<LoopState>,
    ticks: Arc<AtomicU64>,
}

impl LoopHandle {
    /// Request a cooperative stop. In-flight ticks finish first.
    pub fn stop(&self) -> bool {
        self.stop.trigger(StopReason::Programmatic)
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Ticks completed so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Wait until the loop reaches `target`.
    pub async fn wait_for_state(&self, target: LoopState) {
        let mut rx = self.state.clone();
        let _ = rx.wait_for(|state| *state == target).await;
    }
}

/// Drives agent ticks at a fixed interval.
pub struct LoopController {
    config: LoopConfig,
    manager: Arc<AgentManager>,
    scheduler: Scheduler,
    bus: Arc<EventBus>,
    state_tx: watch::Sender<LoopState>,
    ticks: Arc<AtomicU64>,
    stop: StopSignal,
    claimed: AtomicBool,
}

impl LoopController {
    #[must_use]
    pub fn new(
        config: LoopConfig,
        manager: Arc<AgentManager>,
        scheduler: Scheduler,
        bus: Arc<EventBus>,
    ) -> Self {
        let (state_tx, _rx) = watch::channel(LoopState::Initializing);
        Self {
            config,
            manager,
            scheduler,
            bus,
            state_tx,
            ticks: Arc::new(AtomicU64::new(0)),
            stop: StopSignal::new(),
            claimed: AtomicBool::new(false),
        }
    }

    /// Share an externally owned stop signal, e.g. one wired to OS signals.
    #[must_use]
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            stop: self.stop.clone(),
            state: self.state_tx.subscribe(),
            ticks: Arc::clone(&self.ticks),
        }
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        *self.state_tx.borrow()
    }

    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Whether `run` has been entered.
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Run until the stop signal fires.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyStarted` if the loop has already run.
    pub async fn run(&self) -> Result<LoopSummary> {
        self.run_inner(None).await
    }

    /// Run exactly `ticks` ticks unless stopped earlier, then shut down.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyStarted` if the loop has already run.
    pub async fn run_for(&self, ticks: u64) -> Result<LoopSummary> {
        self.run_inner(Some(ticks)).await
    }

    async fn run_inner(&self, limit: Option<u64>) -> Result<LoopSummary> {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return Err(Error::already_started("loop controller"));
        }
        info!(
            strategy = self.scheduler.strategy_name(),
            interval_ms = u64::try_from(self.config.tick_interval.as_millis()).unwrap_or(u64::MAX),
            max_agents = self.config.max_agents_per_tick,
            parallel = self.config.parallel_ticks,
            "Loop initializing"
        );
        let started = self.manager.start_all().await;
        self.set_state(LoopState::Running);

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut completed = 0u64;

        loop {
            if limit.is_some_and(|limit| completed >= limit) || self.stop.is_triggered() {
                break;
            }
            tokio::select! {
                biased;
                _ = self.stop.wait() => break,
                _ = interval.tick() => {}
            }
            let tick = self.ticks.load(Ordering::Acquire) + 1;
            self.tick_once(tick).await;
            self.ticks.store(tick, Ordering::Release);
            completed += 1;
        }

        self.set_state(LoopState::Stopping);
        let shut_down = self.manager.shutdown_all().await;
        self.set_state(LoopState::Stopped);

        let summary = LoopSummary {
            ticks: completed,
            started,
            shut_down,
            stop_reason: self.stop.reason(),
        };
        info!(ticks = summary.ticks, "Loop stopped");
        Ok(summary)
    }

    /// Select, tick and deliver events for one tick.
    pub async fn tick_once(&self, tick: u64) -> TickReport {
        let start = Instant::now();
        let views = self.manager.views();
        let selected = self
            .scheduler
            .select_agents(tick, &views, self.config.max_agents_per_tick);

        let outcomes: Vec<TickOutcome> = if self.config.parallel_ticks {
            join_all(selected.iter().map(|name| self.manager.run_tick(name, tick)))
                .await
                .into_iter()
                .flatten()
                .collect()
        } else {
            let mut outcomes = Vec::with_capacity(selected.len());
            for name in &selected {
                if let Some(outcome) = self.manager.run_tick(name, tick).await {
                    outcomes.push(outcome);
                }
            }
            outcomes
        };

        let events_delivered = self.manager.deliver_all_events(tick).await;
        let failed: Vec<String> = outcomes
            .iter()
            .filter(|outcome| outcome.error.is_some())
            .map(|outcome| outcome.agent.clone())
            .collect();
        let report = TickReport {
            tick,
            selected,
            failed,
            events_delivered,
            duration: start.elapsed(),
        };

        let duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX);
        debug!(
            tick,
            selected = report.selected.len(),
            failed = report.failed.len(),
            events = report.events_delivered,
            duration_ms,
            "Tick complete"
        );
        self.bus.publish(Event::new(
            TICK_EVENT,
            LOOP_EVENT_SOURCE,
            json!({
                "tick": tick,
                "selected": report.selected,
                "failed": report.failed,
                "duration_ms": duration_ms,
            }),
        ));
        report
    }

    fn set_state(&self, next: LoopState) {
        let previous = self.state_tx.send_replace(next);
        info!(from = %previous, to = %next, "Loop state changed");
    }
}

impl std::fmt::Debug for LoopController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopController")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("state", &self.state())
            .field("ticks", &self.tick_count())
            .finish_non_exhaustive()
    }
}
