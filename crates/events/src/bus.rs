//! Event bus for pub/sub coordination.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tickloom_core::{Error, Result};
use tracing::{debug, warn};

use crate::error::HandlerResult;
use crate::event::Event;
use crate::types::EventId;

/// Subscription key that receives every event type.
pub const WILDCARD: &str = "*";

/// Callback invoked synchronously for each matching event.
pub trait EventHandler: Send + Sync {
    /// Handle one event. Errors are caught and logged by the bus.
    fn handle(&self, event: &Event) -> HandlerResult;
}

impl<F> EventHandler for F
where
    F: Fn(&Event) -> HandlerResult + Send + Sync,
{
    fn handle(&self, event: &Event) -> HandlerResult {
        self(event)
    }
}

/// Registered handler with its global subscription order.
struct Subscriber {
    subscriber_id: String,
    handler: Arc<dyn EventHandler>,
    order: u64,
}

/// Outcome of a single `publish` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    /// Id of the published event.
    pub event_id: EventId,
    /// Handlers that returned `Ok`.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Cumulative bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub handler_failures: u64,
}

/// In-process publish/subscribe channel with bounded history.
///
/// `publish` dispatches synchronously: every current subscriber of the event
/// type (plus [`WILDCARD`] subscribers) runs in subscription order before the
/// call returns. The subscriber table is snapshotted before dispatch, so
/// handlers may publish, subscribe or unsubscribe without deadlocking.
pub struct EventBus {
    /// Subscribers keyed by event type.
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    /// Most recent events, oldest first.
    history: Mutex<VecDeque<Arc<Event>>>,
    history_size: usize,
    next_order: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
}

impl EventBus {
    /// Create a bus retaining at most `history_size` events.
    #[must_use]
    pub fn new(history_size: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(history_size.min(1024))),
            history_size,
            next_order: AtomicU64::new(0),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    /// Subscribe a closure to `event_type` under `subscriber_id`.
    ///
    /// Subscribing again with the same `(event_type, subscriber_id)` replaces
    /// the handler and moves it to the end of the dispatch order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if either identifier is empty.
    pub fn subscribe<F>(&self, event_type: &str, subscriber_id: &str, handler: F) -> Result<()>
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe_handler(event_type, subscriber_id, Arc::new(handler))
    }

    /// Subscribe a shared [`EventHandler`] implementation.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if either identifier is empty.
    pub fn subscribe_handler(
        &self,
        event_type: &str,
        subscriber_id: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()> {
        if event_type.trim().is_empty() {
            return Err(Error::validation("event type must not be empty"));
        }
        if subscriber_id.trim().is_empty() {
            return Err(Error::validation("subscriber id must not be empty"));
        }

        let order = self.next_order.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = write(&self.subscribers);
        let entries = subscribers.entry(event_type.to_string()).or_default();
        entries.retain(|s| s.subscriber_id != subscriber_id);
        entries.push(Subscriber {
            subscriber_id: subscriber_id.to_string(),
            handler,
            order,
        });

        debug!(event_type, subscriber_id, "Subscribed handler");
        Ok(())
    }

    /// Remove a subscription. Returns whether one was removed.
    pub fn unsubscribe(&self, event_type: &str, subscriber_id: &str) -> bool {
        let mut subscribers = write(&self.subscribers);
        let Some(entries) = subscribers.get_mut(event_type) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|s| s.subscriber_id != subscriber_id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            subscribers.remove(event_type);
        }

        if removed {
            debug!(event_type, subscriber_id, "Unsubscribed handler");
        }
        removed
    }

    /// Remove every subscription held by `subscriber_id`. Returns the count removed.
    pub fn unsubscribe_all(&self, subscriber_id: &str) -> usize {
        let mut subscribers = write(&self.subscribers);
        let mut removed = 0;
        for entries in subscribers.values_mut() {
            let before = entries.len();
            entries.retain(|s| s.subscriber_id != subscriber_id);
            removed += before - entries.len();
        }
        subscribers.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// Publish an event to all current subscribers of its type.
    ///
    /// Each handler invocation is isolated: errors and panics are caught,
    /// logged and counted, and dispatch continues with the next handler.
    pub fn publish(&self, event: Event) -> PublishReport {
        let event = Arc::new(event);
        self.record(Arc::clone(&event));
        self.published.fetch_add(1, Ordering::Relaxed);

        let targets = self.targets_for(event.event_type());
        let mut report = PublishReport {
            event_id: event.id(),
            delivered: 0,
            failed: 0,
        };

        for (subscriber_id, handler) in targets {
            match invoke(handler.as_ref(), &event) {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    report.failed += 1;
                    warn!(
                        event_id = %event.id(),
                        event_type = event.event_type(),
                        subscriber_id = %subscriber_id,
                        error = %reason,
                        "Event handler failed"
                    );
                }
            }
        }

        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.handler_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);

        debug!(
            event_id = %event.id(),
            event_type = event.event_type(),
            source = event.source(),
            delivered = report.delivered,
            failed = report.failed,
            "Published event"
        );

        report
    }

    /// Snapshot of retained history, oldest first, optionally filtered.
    ///
    /// History is diagnostic only: subscribers added after an event was
    /// published are never replayed automatically.
    #[must_use]
    pub fn history(&self, event_type: Option<&str>, source: Option<&str>) -> Vec<Arc<Event>> {
        lock(&self.history)
            .iter()
            .filter(|e| event_type.is_none_or(|t| e.event_type() == t))
            .filter(|e| source.is_none_or(|s| e.source() == s))
            .cloned()
            .collect()
    }

    /// Drop all retained history.
    pub fn clear_history(&self) {
        lock(&self.history).clear();
    }

    /// Number of handlers subscribed to exactly `event_type`.
    #[must_use]
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        read(&self.subscribers)
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Configured history capacity.
    #[must_use]
    pub const fn history_size(&self) -> usize {
        self.history_size
    }

    /// Cumulative delivery counters.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }

    fn record(&self, event: Arc<Event>) {
        if self.history_size == 0 {
            return;
        }
        let mut history = lock(&self.history);
        while history.len() >= self.history_size {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Handlers for `event_type` plus wildcard handlers, in subscription order.
    fn targets_for(&self, event_type: &str) -> Vec<(String, Arc<dyn EventHandler>)> {
        let subscribers = read(&self.subscribers);
        let typed = subscribers.get(event_type).into_iter().flatten();
        let wildcard = if event_type == WILDCARD {
            None
        } else {
            subscribers.get(WILDCARD)
        };

        let mut targets: Vec<&Subscriber> = typed.chain(wildcard.into_iter().flatten()).collect();
        targets.sort_by_key(|s| s.order);
        targets
            .into_iter()
            .map(|s| (s.subscriber_id.clone(), Arc::clone(&s.handler)))
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("event_types", &read(&self.subscribers).len())
            .field("history_size", &self.history_size)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn invoke(handler: &dyn EventHandler, event: &Event) -> std::result::Result<(), String> {
    match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(
            || "handler panicked".to_string(),
            |msg| format!("handler panicked: {msg}"),
        )
}

// Handlers never run while a lock is held, so a poisoned lock still guards
// consistent data.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
