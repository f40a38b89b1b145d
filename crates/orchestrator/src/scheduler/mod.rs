//! Per-tick agent selection.
//!
//! Three interchangeable strategies decide which agents run on a tick:
//!
//! - `PriorityWeightedStrategy`: selection frequency proportional to priority
//! - `RoundRobinStrategy`: strict rotation, priority ignored
//! - `LoadAwareStrategy`: cheapest recent tick duration first
//!
//! # Example
//!
//! ```ignore
//! use orchestrator::scheduler::{Scheduler, StrategyKind};
//!
//! let scheduler = Scheduler::new(StrategyKind::RoundRobin);
//! let selected = scheduler.select_agents(tick, &manager.views().await, 2);
//! ```

mod load_aware;
mod priority_weighted;
mod round_robin;
mod strategy;

pub use load_aware::LoadAwareStrategy;
pub use priority_weighted::PriorityWeightedStrategy;
pub use round_robin::RoundRobinStrategy;
pub use strategy::{AgentView, SchedulingStrategy, StrategyKind};

use tracing::debug;

/// Create a boxed strategy for `kind`.
#[must_use]
pub fn create_strategy(kind: StrategyKind) -> Box<dyn SchedulingStrategy> {
    match kind {
        StrategyKind::PriorityWeighted => Box::new(PriorityWeightedStrategy::new()),
        StrategyKind::RoundRobin => Box::new(RoundRobinStrategy::new()),
        StrategyKind::LoadAware => Box::new(LoadAwareStrategy::new()),
    }
}

/// Names accepted by [`StrategyKind::from_str`](std::str::FromStr).
#[must_use]
pub fn available_strategies() -> &'static [&'static str] {
    &["priority_weighted", "round_robin", "load_aware"]
}

/// Owns the active strategy and applies the rules common to all of them.
pub struct Scheduler {
    strategy: Box<dyn SchedulingStrategy>,
}

impl Scheduler {
    #[must_use]
    pub fn new(kind: StrategyKind) -> Self {
        Self::with_strategy(create_strategy(kind))
    }

    #[must_use]
    pub fn with_strategy(strategy: Box<dyn SchedulingStrategy>) -> Self {
        Self { strategy }
    }

    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Pick at most `max_agents` enabled agents for `tick`, in run order.
    ///
    /// `max_agents` is clamped to the number of enabled agents. The result
    /// never contains a disabled agent or a duplicate.
    #[must_use]
    pub fn select_agents(&self, tick: u64, agents: &[AgentView], max_agents: usize) -> Vec<String> {
        let enabled: Vec<AgentView> = agents.iter().filter(|a| a.enabled).cloned().collect();
        let limit = max_agents.min(enabled.len());
        if limit == 0 {
            return Vec::new();
        }
        let selected = self.strategy.select(tick, &enabled, limit);
        debug!(
            tick,
            strategy = self.strategy.name(),
            selected = ?selected,
            "Agents selected"
        );
        selected
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("strategy", &self.strategy.name())
            .finish()
    }
}
