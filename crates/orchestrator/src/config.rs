//! Runtime configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scheduler::StrategyKind;
use crate::{Error, Result};

/// Configuration accepted when building a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Number of concurrent workers executing work items.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Time between loop ticks in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Agent selection strategy.
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Upper bound on agents ticked per cycle.
    #[serde(default = "default_max_agents_per_tick")]
    pub max_agents_per_tick: usize,

    /// Events retained in the bus history.
    #[serde(default = "default_event_history_size")]
    pub event_history_size: usize,

    /// Writes retained per key in the state history.
    #[serde(default = "default_state_history_size")]
    pub state_history_size: usize,

    /// Terminal work items retained before the oldest are evicted.
    #[serde(default)]
    pub work_retention_limit: Option<usize>,

    /// Dispatch the agents selected for one tick concurrently.
    #[serde(default)]
    pub parallel_ticks: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            tick_interval_ms: default_tick_interval_ms(),
            strategy: StrategyKind::default(),
            max_agents_per_tick: default_max_agents_per_tick(),
            event_history_size: default_event_history_size(),
            state_history_size: default_state_history_size(),
            work_retention_limit: None,
            parallel_ticks: false,
        }
    }
}

impl RuntimeConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::invalid_config("worker_count", "must be greater than 0"));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::invalid_config(
                "tick_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.max_agents_per_tick == 0 {
            return Err(Error::invalid_config(
                "max_agents_per_tick",
                "must be greater than 0",
            ));
        }
        if self.work_retention_limit == Some(0) {
            return Err(Error::invalid_config(
                "work_retention_limit",
                "must be greater than 0 when set",
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `TomlParseFailed` for malformed input and `InvalidConfig`
    /// when a value is out of range.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| Error::toml_parse_failed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, otherwise as
    /// [`RuntimeConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::serialization(e.to_string()))
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    #[must_use]
    pub const fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            worker_count: self.worker_count,
            retention_limit: self.work_retention_limit,
        }
    }

    #[must_use]
    pub const fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            tick_interval: self.tick_interval(),
            max_agents_per_tick: self.max_agents_per_tick,
            parallel_ticks: self.parallel_ticks,
        }
    }
}

/// Settings consumed by the [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub worker_count: usize,
    pub retention_limit: Option<usize>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        RuntimeConfig::default().orchestrator_config()
    }
}

/// Settings consumed by the [`LoopController`](crate::LoopController).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub tick_interval: Duration,
    pub max_agents_per_tick: usize,
    pub parallel_ticks: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        RuntimeConfig::default().loop_config()
    }
}

const fn default_worker_count() -> usize {
    4
}

const fn default_tick_interval_ms() -> u64 {
    100
}

const fn default_max_agents_per_tick() -> usize {
    4
}

const fn default_event_history_size() -> usize {
    1000
}

const fn default_state_history_size() -> usize {
    10
}
