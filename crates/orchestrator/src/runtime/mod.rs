//! Wiring for a complete tickloom runtime.
//!
//! [`Runtime`] builds one shared [`EventBus`] and [`StateContext`] and hands
//! them to the orchestrator, the agent manager and the loop controller by
//! constructor injection.

mod loop_controller;

pub use loop_controller::{
    LOOP_EVENT_SOURCE, LoopController, LoopHandle, LoopState, LoopSummary, TICK_EVENT, TickReport,
};

use std::sync::Arc;

use tickloom_events::EventBus;
use tracing::info;

use crate::agents::{Agent, AgentManager};
use crate::config::RuntimeConfig;
use crate::scheduler::Scheduler;
use crate::shutdown::StopSignal;
use crate::state::StateContext;
use crate::work::{Orchestrator, ShutdownSummary};
use crate::Result;

/// Outcome of [`Runtime::shutdown`].
#[derive(Debug, Clone)]
pub struct RuntimeShutdown {
    pub loop_state: LoopState,
    pub work: ShutdownSummary,
}

/// A fully wired set of components sharing one bus and one state store.
pub struct Runtime {
    config: RuntimeConfig,
    bus: Arc<EventBus>,
    state: Arc<StateContext>,
    orchestrator: Arc<Orchestrator>,
    agents: Arc<AgentManager>,
    controller: LoopController,
}

impl Runtime {
    /// Validate `config` and build every component.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is rejected.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        Self::with_stop_signal(config, StopSignal::new())
    }

    /// Build with an externally owned stop signal.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is rejected.
    pub fn with_stop_signal(config: RuntimeConfig, stop: StopSignal) -> Result<Self> {
        config.validate()?;

        let bus = Arc::new(EventBus::new(config.event_history_size));
        let state = Arc::new(StateContext::with_event_bus(
            config.state_history_size,
            Arc::clone(&bus),
        ));
        let orchestrator = Arc::new(Orchestrator::with_event_bus(
            config.orchestrator_config(),
            Arc::clone(&bus),
        ));
        let agents = Arc::new(
            AgentManager::new(Arc::clone(&state), Arc::clone(&bus))
                .with_orchestrator(Arc::clone(&orchestrator)),
        );
        let controller = LoopController::new(
            config.loop_config(),
            Arc::clone(&agents),
            Scheduler::new(config.strategy),
            Arc::clone(&bus),
        )
        .with_stop_signal(stop);

        info!(
            workers = config.worker_count,
            strategy = %config.strategy,
            tick_interval_ms = config.tick_interval_ms,
            "Runtime built"
        );
        Ok(Self {
            config,
            bus,
            state,
            orchestrator,
            agents,
            controller,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    #[must_use]
    pub fn state(&self) -> Arc<StateContext> {
        Arc::clone(&self.state)
    }

    #[must_use]
    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        Arc::clone(&self.orchestrator)
    }

    #[must_use]
    pub fn agents(&self) -> Arc<AgentManager> {
        Arc::clone(&self.agents)
    }

    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        self.controller.handle()
    }

    /// # Errors
    ///
    /// See [`AgentManager::register`].
    pub async fn register(&self, agent: Box<dyn Agent>) -> Result<()> {
        self.agents.register(agent).await
    }

    /// Start the worker pool (if needed) and run the loop until stopped.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyStarted` if the loop already ran, or the error from
    /// starting the worker pool.
    pub async fn run(&self) -> Result<LoopSummary> {
        self.ensure_workers()?;
        self.controller.run().await
    }

    /// Start the worker pool (if needed) and run exactly `ticks` ticks.
    ///
    /// # Errors
    ///
    /// As [`Runtime::run`].
    pub async fn run_for(&self, ticks: u64) -> Result<LoopSummary> {
        self.ensure_workers()?;
        self.controller.run_for(ticks).await
    }

    fn ensure_workers(&self) -> Result<()> {
        if self.orchestrator.is_started() {
            return Ok(());
        }
        self.orchestrator.start(self.config.worker_count)
    }

    /// Request a cooperative loop stop.
    pub fn stop(&self) -> bool {
        self.controller.handle().stop()
    }

    /// Stop the loop, wait for it to reach `Stopped`, then shut down the
    /// orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownInProgress` if the orchestrator was already shut down.
    pub async fn shutdown(&self, drain: bool) -> Result<RuntimeShutdown> {
        let handle = self.controller.handle();
        handle.stop();
        if self.controller.has_started() {
            handle.wait_for_state(LoopState::Stopped).await;
        }
        let work = self.orchestrator.shutdown(drain).await?;
        Ok(RuntimeShutdown {
            loop_state: handle.state(),
            work,
        })
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("controller", &self.controller)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}
