//! # Orchestrator
//!
//! Cooperative task and agent execution core for tickloom.
//!
//! - [`work`]: priority-ordered work queue feeding a bounded worker pool
//! - [`state`]: shared key-value blackboard with per-key history
//! - [`scheduler`]: per-tick agent selection strategies
//! - [`agents`]: the agent capability and its registry
//! - [`runtime`]: the tick loop and full runtime wiring
//!
//! # Example
//!
//! ```ignore
//! let runtime = Runtime::new(RuntimeConfig::default())?;
//! runtime.register(Box::new(MyAgent::new())).await?;
//!
//! let id = runtime
//!     .orchestrator()
//!     .submit(WorkItem::new("index", 5, json!({})), work_fn(index_docs))?;
//!
//! runtime.run_for(10).await?;
//! runtime.shutdown(true).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub use tickloom_core::{Error, ErrorKind, Result, ResultExt};

pub mod agents;
pub mod config;
pub mod runtime;
pub mod scheduler;
pub mod shutdown;
pub mod state;
pub mod work;

pub use agents::{Agent, AgentContext, AgentManager, AgentResult, AgentStats};
pub use config::{LoopConfig, OrchestratorConfig, RuntimeConfig};
pub use runtime::{LoopController, LoopHandle, LoopState, Runtime};
pub use scheduler::{Scheduler, SchedulingStrategy, StrategyKind};
pub use shutdown::{StopReason, StopSignal, install_signal_handlers};
pub use state::StateContext;
pub use work::{
    Executable, ExecutionError, Orchestrator, PriorityQueue, WorkId, WorkItem, WorkStatus,
    work_fn,
};

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
