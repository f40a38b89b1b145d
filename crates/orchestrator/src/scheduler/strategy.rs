//! Strategy trait and the agent view strategies operate on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::agents::AgentStats;

/// What a strategy knows about one registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentView {
    pub name: String,
    pub priority: u32,
    pub enabled: bool,
    pub stats: AgentStats,
}

impl AgentView {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            stats: AgentStats::default(),
        }
    }

    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_stats(mut self, stats: AgentStats) -> Self {
        self.stats = stats;
        self
    }
}

/// Decides which agents run on a tick.
///
/// `agents` arrive in registration order. Implementations must skip
/// disabled agents, return at most `limit` distinct names and be
/// deterministic for identical call sequences.
pub trait SchedulingStrategy: Send + Sync {
    /// Get the strategy name.
    fn name(&self) -> &'static str;

    /// Select agents for `tick`, most preferred first.
    fn select(&self, tick: u64, agents: &[AgentView], limit: usize) -> Vec<String>;
}

/// The selectable strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    PriorityWeighted,
    RoundRobin,
    LoadAware,
}

impl StrategyKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PriorityWeighted => "priority_weighted",
            Self::RoundRobin => "round_robin",
            Self::LoadAware => "load_aware",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "priority_weighted" | "priority" => Ok(Self::PriorityWeighted),
            "round_robin" => Ok(Self::RoundRobin),
            "load_aware" => Ok(Self::LoadAware),
            other => Err(Error::invalid_config(
                "strategy",
                format!(
                    "unknown strategy '{other}', expected one of {}",
                    super::available_strategies().join(", ")
                ),
            )),
        }
    }
}

/// Enabled agents, registration order preserved.
pub(super) fn eligible(agents: &[AgentView]) -> Vec<&AgentView> {
    agents.iter().filter(|agent| agent.enabled).collect()
}
