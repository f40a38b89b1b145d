//! Smooth weighted round-robin over agent priorities.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::strategy::{AgentView, SchedulingStrategy, eligible};

/// Selects agents with frequency proportional to their priority.
///
/// Each agent carries a credit. For every slot on a tick, every candidate
/// not yet chosen this tick gains its priority in credit, the candidate
/// with the most credit is chosen (earliest registration wins ties) and
/// pays back the candidates' combined priority. Credits always sum to zero,
/// so with one slot per tick an agent of priority `p` is chosen exactly `p`
/// times in every `sum(p)` consecutive ticks, and every agent with `p > 0`
/// runs at least once per cycle.
///
/// Agents with priority 0 are only used to fill slots left over once every
/// positive-priority agent has been chosen, in registration order.
#[derive(Debug, Default)]
pub struct PriorityWeightedStrategy {
    credits: Mutex<HashMap<String, i64>>,
}

impl PriorityWeightedStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current credit of an agent, for diagnostics.
    #[must_use]
    pub fn credit(&self, name: &str) -> i64 {
        self.credits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

impl SchedulingStrategy for PriorityWeightedStrategy {
    fn name(&self) -> &'static str {
        "priority_weighted"
    }

    fn select(&self, _tick: u64, agents: &[AgentView], limit: usize) -> Vec<String> {
        let pool = eligible(agents);
        let limit = limit.min(pool.len());
        if limit == 0 {
            return Vec::new();
        }

        let mut credits = self.credits.lock().unwrap_or_else(PoisonError::into_inner);
        // Forget agents that left; a returning agent starts from zero.
        credits.retain(|name, _| pool.iter().any(|agent| &agent.name == name));

        let mut candidates: Vec<&AgentView> =
            pool.iter().copied().filter(|agent| agent.priority > 0).collect();
        let mut selected = Vec::with_capacity(limit);

        while selected.len() < limit && !candidates.is_empty() {
            let total: i64 = candidates.iter().map(|agent| i64::from(agent.priority)).sum();
            let mut best: Option<(usize, i64)> = None;
            for (index, agent) in candidates.iter().enumerate() {
                let credit = credits.entry(agent.name.clone()).or_insert(0);
                *credit += i64::from(agent.priority);
                if best.is_none_or(|(_, best_credit)| *credit > best_credit) {
                    best = Some((index, *credit));
                }
            }
            let Some((index, _)) = best else {
                break;
            };
            let chosen = candidates.remove(index);
            if let Some(credit) = credits.get_mut(&chosen.name) {
                *credit -= total;
            }
            selected.push(chosen.name.clone());
        }

        selected.extend(
            pool.iter()
                .filter(|agent| agent.priority == 0)
                .take(limit - selected.len())
                .map(|agent| agent.name.clone()),
        );
        selected
    }
}
