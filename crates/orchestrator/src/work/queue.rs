//! Priority queue of work item ids.
//!
//! Entries are ordered by priority (highest first) and then by submission
//! sequence (earliest first). A secondary index keyed by id supports
//! removal of arbitrary entries for cancellation, so `push`, `try_pop` and
//! `remove` are all `O(log n)`.
//!
//! Every mutation happens under a single lock, so the heap operation itself
//! is the atomic unit and no caller has to compose `len` with `pop`.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

use super::item::WorkId;
use crate::{Error, Result};

/// A queued reference to a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: WorkId,
    pub priority: i32,
    pub sequence: u64,
}

/// What happens to queued entries once the queue is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseMode {
    /// Blocking pops keep returning entries until the queue is empty.
    Drain,
    /// Blocking pops return `None` immediately; entries stay in place.
    Discard,
}

type OrderKey = (Reverse<i32>, u64);

#[derive(Debug, Default)]
struct QueueState {
    ordered: BTreeMap<OrderKey, WorkId>,
    index: HashMap<WorkId, OrderKey>,
    next_sequence: u64,
    closed: Option<CloseMode>,
}

impl QueueState {
    fn pop_first(&mut self) -> Option<QueueEntry> {
        let ((Reverse(priority), sequence), id) = self.ordered.pop_first()?;
        self.index.remove(&id);
        Some(QueueEntry {
            id,
            priority,
            sequence,
        })
    }
}

/// Thread-safe priority queue with blocking and non-blocking pops.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl PriorityQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an id with the given priority.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownInProgress` once the queue is closed, and a
    /// validation error if the id is already queued.
    pub fn push(&self, id: WorkId, priority: i32) -> Result<QueueEntry> {
        let entry = {
            let mut state = self.lock();
            if state.closed.is_some() {
                return Err(Error::shutdown_in_progress("enqueue"));
            }
            if state.index.contains_key(&id) {
                return Err(Error::validation(format!("work item '{id}' is already queued")));
            }
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            let key = (Reverse(priority), sequence);
            state.ordered.insert(key, id.clone());
            state.index.insert(id.clone(), key);
            QueueEntry {
                id,
                priority,
                sequence,
            }
        };
        self.available.notify_one();
        Ok(entry)
    }

    /// Remove and return the most urgent entry without waiting.
    #[must_use]
    pub fn try_pop(&self) -> Option<QueueEntry> {
        self.lock().pop_first()
    }

    /// Remove and return the most urgent entry, waiting until one exists.
    ///
    /// Returns `None` once the queue is closed with [`CloseMode::Discard`],
    /// or closed with [`CloseMode::Drain`] and empty.
    pub async fn pop(&self) -> Option<QueueEntry> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a push between the check
            // and the await still wakes this waiter.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed == Some(CloseMode::Discard) {
                    return None;
                }
                if let Some(entry) = state.pop_first() {
                    return Some(entry);
                }
                if state.closed.is_some() {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Delete a queued entry. Absent ids are a no-op.
    pub fn remove(&self, id: &WorkId) -> Option<QueueEntry> {
        let mut state = self.lock();
        let key = state.index.remove(id)?;
        state.ordered.remove(&key).map(|id| QueueEntry {
            id,
            priority: key.0.0,
            sequence: key.1,
        })
    }

    /// The entry the next pop would return.
    #[must_use]
    pub fn peek(&self) -> Option<QueueEntry> {
        self.lock()
            .ordered
            .first_key_value()
            .map(|(&(Reverse(priority), sequence), id)| QueueEntry {
                id: id.clone(),
                priority,
                sequence,
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().ordered.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().ordered.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &WorkId) -> bool {
        self.lock().index.contains_key(id)
    }

    /// All entries in pop order, without mutating the queue.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.lock()
            .ordered
            .iter()
            .map(|(&(Reverse(priority), sequence), id)| QueueEntry {
                id: id.clone(),
                priority,
                sequence,
            })
            .collect()
    }

    /// Stop accepting pushes and wake every blocked pop.
    ///
    /// A discarding close cannot be downgraded back to draining.
    pub fn close(&self, mode: CloseMode) {
        {
            let mut state = self.lock();
            state.closed = match state.closed {
                Some(CloseMode::Discard) => Some(CloseMode::Discard),
                _ => Some(mode),
            };
            debug!(mode = ?mode, remaining = state.ordered.len(), "Priority queue closed");
        }
        self.available.notify_waiters();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }
}
