//! Work items, the priority queue, the worker pool and the orchestrator façade.

pub mod item;
pub mod orchestrator;
pub mod pool;
pub mod queue;

pub use item::{
    Executable, ExecutionError, ExecutionResult, FnExecutable, WorkId, WorkItem, WorkStatus,
    work_fn,
};
pub use orchestrator::{Orchestrator, ShutdownSummary, WORK_EVENT_SOURCE, WorkStats};
pub use pool::WorkerPool;
pub use queue::{CloseMode, PriorityQueue, QueueEntry};
