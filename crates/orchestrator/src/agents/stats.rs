//! Per-agent run statistics.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Ticks kept for the recent-duration average.
pub const RECENT_WINDOW: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    pub tick_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub total_duration: Duration,
    pub last_duration: Option<Duration>,
    pub last_tick: Option<u64>,
    recent: VecDeque<Duration>,
}

impl AgentStats {
    /// Record one tick hook invocation.
    pub fn record_tick(&mut self, tick: u64, duration: Duration, error: Option<String>) {
        self.tick_count += 1;
        self.total_duration += duration;
        self.last_duration = Some(duration);
        self.last_tick = Some(tick);
        self.recent.push_back(duration);
        while self.recent.len() > RECENT_WINDOW {
            self.recent.pop_front();
        }
        if let Some(error) = error {
            self.record_error(error);
        }
    }

    /// Record a failure outside the tick hook (start, event handling).
    pub fn record_error(&mut self, error: String) {
        self.error_count += 1;
        self.last_error = Some(error);
    }

    /// Mean duration over every recorded tick.
    #[must_use]
    pub fn average_duration(&self) -> Duration {
        average(self.total_duration, self.tick_count)
    }

    /// Mean duration over the last [`RECENT_WINDOW`] ticks; zero if never ticked.
    #[must_use]
    pub fn recent_average_duration(&self) -> Duration {
        let total: Duration = self.recent.iter().sum();
        average(total, self.recent.len() as u64)
    }
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let nanos = total.as_nanos() / u128::from(count);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_stats_average_zero() {
        let stats = AgentStats::default();
        assert_eq!(stats.average_duration(), Duration::ZERO);
        assert_eq!(stats.recent_average_duration(), Duration::ZERO);
    }

    #[test]
    fn test_record_tick_updates_counters() {
        let mut stats = AgentStats::default();
        stats.record_tick(1, Duration::from_millis(10), None);
        stats.record_tick(2, Duration::from_millis(30), Some("boom".into()));

        assert_eq!(stats.tick_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.last_error.as_deref(), Some("boom"));
        assert_eq!(stats.last_tick, Some(2));
        assert_eq!(stats.average_duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_recent_window_forgets_old_ticks() {
        let mut stats = AgentStats::default();
        for tick in 0..RECENT_WINDOW as u64 {
            stats.record_tick(tick, Duration::from_millis(100), None);
        }
        for tick in 0..RECENT_WINDOW as u64 {
            stats.record_tick(tick, Duration::from_millis(2), None);
        }
        assert_eq!(stats.recent_average_duration(), Duration::from_millis(2));
        assert_eq!(stats.average_duration(), Duration::from_millis(51));
    }
}
