//! The agent capability and the context handed to its hooks.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tickloom_events::{Event, EventBus, PublishReport};

use crate::state::StateContext;
use crate::work::{Executable, ExecutionError, Orchestrator, WorkId, WorkItem};
use crate::{Error, Result};

/// Result returned by agent hooks. Failures are recorded, never propagated.
pub type AgentResult = std::result::Result<(), ExecutionError>;

/// A long-lived unit selected by the scheduler and ticked by the loop.
///
/// Only `name` and `on_tick` are required. Hooks take `&mut self`; the
/// manager guarantees no two hooks of the same agent run at once.
///
/// ```ignore
/// struct Pinger;
///
/// #[async_trait]
/// impl Agent for Pinger {
///     fn name(&self) -> &str { "pinger" }
///
///     async fn on_tick(&mut self, ctx: &AgentContext) -> AgentResult {
///         ctx.publish("ping", json!({ "tick": ctx.tick() }));
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique name within the manager.
    fn name(&self) -> &str;

    /// Initial scheduling weight.
    fn priority(&self) -> u32 {
        1
    }

    /// Event types delivered to [`Agent::on_event`]. `"*"` receives all.
    fn subscriptions(&self) -> Vec<String> {
        Vec::new()
    }

    async fn on_start(&mut self, _ctx: &AgentContext) -> AgentResult {
        Ok(())
    }

    async fn on_tick(&mut self, ctx: &AgentContext) -> AgentResult;

    async fn on_event(&mut self, _event: &Event, _ctx: &AgentContext) -> AgentResult {
        Ok(())
    }

    /// Called after any other hook fails or panics.
    async fn on_error(&mut self, _error: &ExecutionError) {}

    async fn on_shutdown(&mut self, _ctx: &AgentContext) -> AgentResult {
        Ok(())
    }
}

/// Handles an agent borrows for the duration of one hook call.
#[derive(Clone)]
pub struct AgentContext {
    agent: String,
    tick: u64,
    state: Arc<StateContext>,
    bus: Arc<EventBus>,
    orchestrator: Option<Arc<Orchestrator>>,
}

impl AgentContext {
    pub fn new(
        agent: impl Into<String>,
        tick: u64,
        state: Arc<StateContext>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            agent: agent.into(),
            tick,
            state,
            bus,
            orchestrator: None,
        }
    }

    #[must_use]
    pub fn with_orchestrator(mut self, orchestrator: Arc<Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    #[must_use]
    pub fn agent_name(&self) -> &str {
        &self.agent
    }

    /// Tick being executed; 0 during start and shutdown.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    #[must_use]
    pub fn state(&self) -> &StateContext {
        &self.state
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Publish an event with this agent as its source.
    pub fn publish(&self, event_type: &str, data: Value) -> PublishReport {
        self.bus.publish(Event::new(event_type, self.agent.as_str(), data))
    }

    /// Queue work on the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when no orchestrator is attached, otherwise
    /// whatever [`Orchestrator::submit`] returns.
    pub fn submit_work(&self, item: WorkItem, work: Arc<dyn Executable>) -> Result<WorkId> {
        let orchestrator = self.orchestrator.as_ref().ok_or_else(|| {
            Error::validation(format!("agent '{}' has no orchestrator attached", self.agent))
        })?;
        orchestrator.submit(item, work)
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("agent", &self.agent)
            .field("tick", &self.tick)
            .field("has_orchestrator", &self.orchestrator.is_some())
            .finish_non_exhaustive()
    }
}
