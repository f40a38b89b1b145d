//! Prefer agents whose recent ticks were cheap.

use itertools::Itertools;

use super::strategy::{AgentView, SchedulingStrategy, eligible};

/// Orders enabled agents by recent average tick duration, then error count,
/// then name, and takes the first `limit`.
///
/// Agents that have never ticked report a zero duration and are tried
/// first. Errors only break ties; an erroring agent is never excluded.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadAwareStrategy;

impl LoadAwareStrategy {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SchedulingStrategy for LoadAwareStrategy {
    fn name(&self) -> &'static str {
        "load_aware"
    }

    fn select(&self, _tick: u64, agents: &[AgentView], limit: usize) -> Vec<String> {
        eligible(agents)
            .into_iter()
            .sorted_by(|a, b| {
                a.stats
                    .recent_average_duration()
                    .cmp(&b.stats.recent_average_duration())
                    .then_with(|| a.stats.error_count.cmp(&b.stats.error_count))
                    .then_with(|| a.name.cmp(&b.name))
            })
            .take(limit)
            .map(|agent| agent.name.clone())
            .collect()
    }
}
