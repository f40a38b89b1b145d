//! Strict rotation over enabled agents.

use super::strategy::{AgentView, SchedulingStrategy, eligible};

/// Rotates through enabled agents in registration order.
///
/// Tick `t` starts the window at offset `t * limit mod n`, so consecutive
/// ticks hand out consecutive agents and one rotation of `ceil(n / limit)`
/// ticks visits every agent. Selection is a pure function of the tick and
/// the enabled set.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinStrategy;

impl RoundRobinStrategy {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SchedulingStrategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, tick: u64, agents: &[AgentView], limit: usize) -> Vec<String> {
        let pool = eligible(agents);
        let n = pool.len();
        let limit = limit.min(n);
        if limit == 0 {
            return Vec::new();
        }

        let offset = (u128::from(tick) * limit as u128) % n as u128;
        let offset = usize::try_from(offset).unwrap_or(0);
        (0..limit)
            .filter_map(|i| pool.get((offset + i) % n))
            .map(|agent| agent.name.clone())
            .collect()
    }
}
