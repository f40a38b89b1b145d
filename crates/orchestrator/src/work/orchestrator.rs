//! Public façade over the priority queue and worker pool.
//!
//! The orchestrator owns every submitted item. Collaborators keep only the
//! returned [`WorkId`] and observe progress through [`Orchestrator::status`],
//! [`Orchestrator::list`] and the `work.*` events published on an attached
//! [`EventBus`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tickloom_events::{Event, EventBus};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::item::{Executable, WorkId, WorkItem, WorkStatus};
use super::pool::WorkerPool;
use super::queue::{CloseMode, PriorityQueue, QueueEntry};
use crate::config::OrchestratorConfig;
use crate::{Error, Result};

/// Event source used for every `work.*` event.
pub const WORK_EVENT_SOURCE: &str = "orchestrator";

struct Tracked {
    item: WorkItem,
    work: Option<Arc<dyn Executable>>,
}

#[derive(Default)]
struct WorkTable {
    entries: HashMap<WorkId, Tracked>,
    terminal_order: VecDeque<WorkId>,
}

impl WorkTable {
    /// Remember a terminal id and evict the oldest terminal items past `limit`.
    fn record_terminal(&mut self, id: WorkId, limit: Option<usize>) -> usize {
        self.terminal_order.push_back(id);
        let Some(limit) = limit else {
            return 0;
        };
        let mut evicted = 0;
        while self.terminal_order.len() > limit {
            if let Some(old) = self.terminal_order.pop_front() {
                self.entries.remove(&old);
                evicted += 1;
            }
        }
        evicted
    }
}

/// State shared between the façade and its workers.
pub(crate) struct WorkShared {
    pub(crate) queue: PriorityQueue,
    table: RwLock<WorkTable>,
    bus: Option<Arc<EventBus>>,
    retention_limit: Option<usize>,
    settled: Notify,
}

impl WorkShared {
    fn read(&self) -> RwLockReadGuard<'_, WorkTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, WorkTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move a popped item to running and hand back what the worker needs.
    ///
    /// Returns `None` when the item was cancelled or evicted after it was
    /// popped; the transition happens under the same lock as `cancel`.
    pub(crate) fn claim(&self, id: &WorkId) -> Option<(WorkItem, Arc<dyn Executable>)> {
        let claimed = {
            let mut table = self.write();
            let tracked = table.entries.get_mut(id)?;
            if tracked.item.status != WorkStatus::Queued {
                return None;
            }
            let work = tracked.work.clone()?;
            tracked.item.transition_to(WorkStatus::Running).ok()?;
            (tracked.item.clone(), work)
        };
        self.emit("work.started", &claimed.0);
        Some(claimed)
    }

    /// Record the outcome of an execution.
    pub(crate) fn finish(&self, id: &WorkId, outcome: std::result::Result<Value, String>) {
        let finished = {
            let mut table = self.write();
            let Some(tracked) = table.entries.get_mut(id) else {
                warn!(work_id = %id, "Finished work item is no longer tracked");
                return;
            };
            let next = if outcome.is_ok() {
                WorkStatus::Done
            } else {
                WorkStatus::Error
            };
            if let Err(e) = tracked.item.transition_to(next) {
                warn!(work_id = %id, error = %e, "Discarding execution outcome");
                return;
            }
            match outcome {
                Ok(value) => tracked.item.result = Some(value),
                Err(reason) => tracked.item.error = Some(reason),
            }
            tracked.work = None;
            let snapshot = tracked.item.clone();
            let evicted = table.record_terminal(id.clone(), self.retention_limit);
            if evicted > 0 {
                debug!(evicted, "Evicted terminal work items past retention limit");
            }
            snapshot
        };

        match finished.status {
            WorkStatus::Done => self.emit("work.completed", &finished),
            _ => self.emit("work.failed", &finished),
        }
        self.settled.notify_waiters();
    }

    fn emit(&self, event_type: &str, item: &WorkItem) {
        let Some(bus) = &self.bus else {
            return;
        };
        let mut data = json!({
            "id": item.id.as_str(),
            "name": item.name,
            "priority": item.priority,
            "status": item.status,
        });
        if let (Some(error), Some(map)) = (&item.error, data.as_object_mut()) {
            map.insert("error".to_string(), Value::String(error.clone()));
        }
        let event =
            Event::new(event_type, WORK_EVENT_SOURCE, data).with_correlation_id(item.id.as_str());
        bus.publish(event);
    }
}

/// Counts of tracked items per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkStats {
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
    pub cancelled: usize,
    pub queue_depth: usize,
}

impl WorkStats {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.queued + self.running + self.done + self.error + self.cancelled
    }
}

/// Outcome of [`Orchestrator::shutdown`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShutdownSummary {
    pub drained: bool,
    /// Items left queued and never executed.
    pub abandoned: usize,
    /// Workers whose task ended abnormally.
    pub worker_failures: usize,
    pub duration_ms: u64,
}

/// Submit, cancel and query work; owns the worker pool lifecycle.
pub struct Orchestrator {
    config: OrchestratorConfig,
    shared: Arc<WorkShared>,
    pool: Mutex<Option<WorkerPool>>,
    accepting: AtomicBool,
    started: AtomicBool,
}

impl Orchestrator {
    /// Create an orchestrator with no event bus.
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::build(config, None)
    }

    /// Create an orchestrator that publishes `work.*` lifecycle events.
    #[must_use]
    pub fn with_event_bus(config: OrchestratorConfig, bus: Arc<EventBus>) -> Self {
        Self::build(config, Some(bus))
    }

    fn build(config: OrchestratorConfig, bus: Option<Arc<EventBus>>) -> Self {
        let shared = WorkShared {
            queue: PriorityQueue::new(),
            table: RwLock::new(WorkTable::default()),
            bus,
            retention_limit: config.retention_limit,
            settled: Notify::new(),
        };
        Self {
            config,
            shared: Arc::new(shared),
            pool: Mutex::new(None),
            accepting: AtomicBool::new(true),
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Enqueue an item with the function that executes it.
    ///
    /// Returns immediately; execution happens on the worker pool.
    ///
    /// # Errors
    ///
    /// - `Validation` for a blank name, negative priority, non-queued status
    ///   or an id that is already tracked.
    /// - `ShutdownInProgress` once [`Orchestrator::shutdown`] has been called.
    pub fn submit(&self, item: WorkItem, work: Arc<dyn Executable>) -> Result<WorkId> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(Error::shutdown_in_progress("submit"));
        }
        item.validate()?;

        let id = item.id.clone();
        let priority = item.priority;
        let snapshot = item.clone();
        {
            let mut table = self.shared.write();
            if table.entries.contains_key(&id) {
                return Err(Error::validation(format!("work item '{id}' already submitted")));
            }
            table.entries.insert(
                id.clone(),
                Tracked {
                    item,
                    work: Some(work),
                },
            );
        }

        // Observers must see `work.queued` before any worker can claim the id.
        debug!(work_id = %id, name = %snapshot.name, priority, "Work item queued");
        self.shared.emit("work.queued", &snapshot);

        let pushed = {
            let mut table = self.shared.write();
            let still_queued = table
                .entries
                .get(&id)
                .is_some_and(|tracked| tracked.item.status == WorkStatus::Queued);
            // A cancel between tracking and enqueueing leaves nothing to push.
            if still_queued {
                self.shared.queue.push(id.clone(), priority).map(|_| ()).inspect_err(|_| {
                    table.entries.remove(&id);
                })
            } else {
                Ok(())
            }
        };

        if let Err(e) = pushed {
            warn!(work_id = %id, error = %e, "Work item rejected after queueing");
            self.shared.emit("work.rejected", &snapshot);
            self.shared.settled.notify_waiters();
            return Err(e);
        }
        Ok(id)
    }

    /// Cancel a queued item.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown id.
    /// - `NotCancellable` once the item is running or terminal.
    pub fn cancel(&self, id: &WorkId) -> Result<WorkItem> {
        let cancelled = {
            let mut table = self.shared.write();
            let tracked = table
                .entries
                .get_mut(id)
                .ok_or_else(|| Error::not_found("work item", id.as_str()))?;
            if tracked.item.status != WorkStatus::Queued {
                return Err(Error::not_cancellable(
                    id.as_str(),
                    tracked.item.status.to_string(),
                ));
            }
            self.shared.queue.remove(id);
            tracked.item.transition_to(WorkStatus::Cancelled)?;
            tracked.work = None;
            let snapshot = tracked.item.clone();
            table.record_terminal(id.clone(), self.shared.retention_limit);
            snapshot
        };

        info!(work_id = %id, "Work item cancelled");
        self.shared.emit("work.cancelled", &cancelled);
        self.shared.settled.notify_waiters();
        Ok(cancelled)
    }

    /// Snapshot of a tracked item.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown or evicted id.
    pub fn status(&self, id: &WorkId) -> Result<WorkItem> {
        self.shared
            .read()
            .entries
            .get(id)
            .map(|tracked| tracked.item.clone())
            .ok_or_else(|| Error::not_found("work item", id.as_str()))
    }

    /// Tracked items, optionally filtered by status, oldest first.
    #[must_use]
    pub fn list(&self, status: Option<WorkStatus>) -> Vec<WorkItem> {
        let mut items: Vec<WorkItem> = self
            .shared
            .read()
            .entries
            .values()
            .filter(|tracked| status.is_none_or(|s| tracked.item.status == s))
            .map(|tracked| tracked.item.clone())
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        items
    }

    #[must_use]
    pub fn stats(&self) -> WorkStats {
        let mut stats = WorkStats {
            queue_depth: self.shared.queue.len(),
            ..WorkStats::default()
        };
        for tracked in self.shared.read().entries.values() {
            match tracked.item.status {
                WorkStatus::Queued => stats.queued += 1,
                WorkStatus::Running => stats.running += 1,
                WorkStatus::Done => stats.done += 1,
                WorkStatus::Error => stats.error += 1,
                WorkStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Queued entries in the order workers will take them.
    #[must_use]
    pub fn queue_snapshot(&self) -> Vec<QueueEntry> {
        self.shared.queue.snapshot()
    }

    /// Evict every terminal item from tracking.
    pub fn cleanup(&self) -> usize {
        let mut table = self.shared.write();
        let before = table.entries.len();
        table.entries.retain(|_, tracked| !tracked.item.status.is_terminal());
        table.terminal_order.clear();
        let evicted = before - table.entries.len();
        debug!(evicted, "Cleaned up terminal work items");
        evicted
    }

    /// Wait until the item reaches a terminal status.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is unknown or evicted while waiting.
    pub async fn wait_for(&self, id: &WorkId) -> Result<WorkItem> {
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let item = self.status(id)?;
            if item.status.is_terminal() {
                return Ok(item);
            }
            notified.await;
        }
    }

    /// Wait for an item to settle and unwrap its outcome.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown or evicted id.
    /// - `Execution` when the item failed or was cancelled.
    pub async fn wait_for_result(&self, id: &WorkId) -> Result<Value> {
        let item = self.wait_for(id).await?;
        match item.status {
            WorkStatus::Done => Ok(item.result.unwrap_or(Value::Null)),
            WorkStatus::Cancelled => Err(Error::execution(item.name, "cancelled before execution")),
            _ => Err(Error::execution(
                item.name,
                item.error.unwrap_or_else(|| "unknown failure".to_string()),
            )),
        }
    }

    /// Launch `worker_count` workers pulling from the queue.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `Validation` for a zero worker count or when no runtime is active.
    /// - `AlreadyStarted` on a second call.
    /// - `ShutdownInProgress` after shutdown.
    pub fn start(&self, worker_count: usize) -> Result<()> {
        if worker_count == 0 {
            return Err(Error::validation("worker count must be greater than 0"));
        }
        if !self.accepting.load(Ordering::Acquire) {
            return Err(Error::shutdown_in_progress("start"));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::validation(format!("worker pool needs a Tokio runtime: {e}")))?;
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::already_started("worker pool"));
        }

        let pool = WorkerPool::spawn(Arc::clone(&self.shared), worker_count, &runtime);
        *self.pool.lock().unwrap_or_else(PoisonError::into_inner) = Some(pool);
        info!(workers = worker_count, "Worker pool started");
        Ok(())
    }

    /// Start with the configured worker count.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::start`].
    pub fn start_default(&self) -> Result<()> {
        self.start(self.config.worker_count)
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting work and wind the pool down.
    ///
    /// With `drain` every queued item is executed before this returns. A pool
    /// that was never started is started for the drain using the configured
    /// worker count. Without `drain` workers finish their in-flight item and
    /// exit; remaining items stay queued and are never executed.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownInProgress` if shutdown was already requested.
    pub async fn shutdown(&self, drain: bool) -> Result<ShutdownSummary> {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return Err(Error::shutdown_in_progress("shutdown"));
        }
        let start = Instant::now();
        info!(drain, queued = self.shared.queue.len(), "Orchestrator shutting down");

        let mode = if drain {
            CloseMode::Drain
        } else {
            CloseMode::Discard
        };
        self.shared.queue.close(mode);

        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner).take();
        if pool.is_none() && drain && !self.shared.queue.is_empty() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    self.started.store(true, Ordering::Release);
                    pool = Some(WorkerPool::spawn(
                        Arc::clone(&self.shared),
                        self.config.worker_count.max(1),
                        &runtime,
                    ));
                }
                Err(e) => warn!(error = %e, "Cannot drain without a Tokio runtime"),
            }
        }

        let worker_failures = match pool {
            Some(pool) => pool.join().await,
            None => 0,
        };

        let abandoned = self.shared.queue.len();
        if abandoned > 0 {
            warn!(abandoned, "Queued work abandoned at shutdown");
        }
        let summary = ShutdownSummary {
            drained: drain,
            abandoned,
            worker_failures,
            duration_ms: duration_ms(start.elapsed()),
        };
        info!(
            abandoned = summary.abandoned,
            duration_ms = summary.duration_ms,
            "Orchestrator shutdown complete"
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("accepting", &self.is_accepting())
            .field("started", &self.is_started())
            .field("queue_depth", &self.shared.queue.len())
            .finish_non_exhaustive()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
