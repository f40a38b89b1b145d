//! Fixed-size pool of workers pulling from the priority queue.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::orchestrator::WorkShared;
use super::queue::QueueEntry;
use crate::panic_message;

/// Handles to the spawned worker tasks.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(shared: Arc<WorkShared>, size: usize, runtime: &Handle) -> Self {
        let workers = (0..size)
            .map(|index| runtime.spawn(run_worker(index, Arc::clone(&shared))))
            .collect();
        Self { workers }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every worker to exit. Returns how many ended abnormally.
    pub async fn join(self) -> usize {
        let mut failures = 0;
        for (index, handle) in self.workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker = index, error = %e, "Worker task ended abnormally");
                failures += 1;
            }
        }
        failures
    }
}

async fn run_worker(index: usize, shared: Arc<WorkShared>) {
    debug!(worker = index, "Worker started");
    while let Some(entry) = shared.queue.pop().await {
        execute_entry(index, &shared, entry).await;
    }
    debug!(worker = index, "Worker exiting");
}

async fn execute_entry(worker: usize, shared: &WorkShared, entry: QueueEntry) {
    let Some((item, work)) = shared.claim(&entry.id) else {
        debug!(worker, work_id = %entry.id, "Skipping work item that is no longer queued");
        return;
    };

    let start = Instant::now();
    let outcome = match AssertUnwindSafe(work.execute(&item.payload))
        .catch_unwind()
        .await
    {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(format!("work function panicked: {}", panic_message(panic.as_ref()))),
    };
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match &outcome {
        Ok(_) => debug!(worker, work_id = %item.id, name = %item.name, elapsed_ms, "Work item done"),
        Err(reason) => warn!(
            worker,
            work_id = %item.id,
            name = %item.name,
            elapsed_ms,
            error = %reason,
            "Work item failed"
        ),
    }
    shared.finish(&item.id, outcome);
}
