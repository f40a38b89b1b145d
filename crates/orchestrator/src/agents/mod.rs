//! Agent capability, per-agent statistics and the agent registry.

mod agent;
mod manager;
mod stats;

pub use agent::{Agent, AgentContext, AgentResult};
pub use manager::{
    AgentLifecycle, AgentManager, AgentSummary, INBOX_CAPACITY, LifecycleReport, TickOutcome,
};
pub use stats::{AgentStats, RECENT_WINDOW};
