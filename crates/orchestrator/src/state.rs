//! Shared key-value blackboard with bounded per-key history.
//!
//! A single fair [`tokio::sync::RwLock`] guards the table. Tokio's lock
//! grants access in request order, so a stream of writers cannot starve
//! readers. Every mutation bumps a global version counter and appends a
//! [`StateChange`] to the key's history.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tickloom_events::{Event, EventBus};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{Error, Result};

/// Event type published for every committed change when a bus is attached.
pub const STATE_CHANGED_EVENT: &str = "state.changed";

/// One committed write. `value` is `None` for a deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub value: Option<Value>,
    pub version: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<Value>,
    history: VecDeque<StateChange>,
}

#[derive(Debug, Default)]
struct StateTable {
    slots: HashMap<String, Slot>,
    version: u64,
}

impl StateTable {
    /// Commit a write or deletion and return the previous value.
    fn commit(&mut self, key: &str, value: Option<Value>, history_size: usize) -> Option<Value> {
        self.version += 1;
        let version = self.version;
        let slot = self.slots.entry(key.to_string()).or_default();
        if history_size > 0 {
            slot.history.push_back(StateChange {
                value: value.clone(),
                version,
                at: Utc::now(),
            });
            while slot.history.len() > history_size {
                slot.history.pop_front();
            }
        }
        let previous = std::mem::replace(&mut slot.value, value);
        // A deleted key with no retained history leaves nothing to keep.
        if slot.value.is_none() && slot.history.is_empty() {
            self.slots.remove(key);
        }
        previous
    }

    fn live(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.slots
            .iter()
            .filter_map(|(key, slot)| slot.value.as_ref().map(|value| (key, value)))
    }
}

/// Serialized form produced by [`StateContext::export_snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u64,
    pub exported_at: DateTime<Utc>,
    pub values: BTreeMap<String, Value>,
}

/// Thread-safe blackboard shared between agents and the loop.
pub struct StateContext {
    table: RwLock<StateTable>,
    history_size: usize,
    bus: Option<Arc<EventBus>>,
}

impl StateContext {
    /// Create a context retaining `history_size` writes per key.
    #[must_use]
    pub fn new(history_size: usize) -> Self {
        Self {
            table: RwLock::new(StateTable::default()),
            history_size,
            bus: None,
        }
    }

    /// Create a context that publishes `state.changed` events on `bus`.
    #[must_use]
    pub fn with_event_bus(history_size: usize, bus: Arc<EventBus>) -> Self {
        Self {
            bus: Some(bus),
            ..Self::new(history_size)
        }
    }

    #[must_use]
    pub const fn history_size(&self) -> usize {
        self.history_size
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.table
            .read()
            .await
            .slots
            .get(key)
            .and_then(|slot| slot.value.clone())
    }

    pub async fn has(&self, key: &str) -> bool {
        self.table
            .read()
            .await
            .slots
            .get(key)
            .is_some_and(|slot| slot.value.is_some())
    }

    /// Write a value, returning the one it replaced.
    pub async fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        let (previous, version) = {
            let mut table = self.table.write().await;
            let previous = table.commit(&key, Some(value), self.history_size);
            (previous, table.version)
        };
        self.notify(&key, "set", version);
        previous
    }

    /// Remove a key, returning its value. Absent keys are a no-op.
    pub async fn delete(&self, key: &str) -> Option<Value> {
        let (previous, version) = {
            let mut table = self.table.write().await;
            if !table.slots.get(key).is_some_and(|slot| slot.value.is_some()) {
                return None;
            }
            let previous = table.commit(key, None, self.history_size);
            (previous, table.version)
        };
        self.notify(key, "delete", version);
        previous
    }

    /// Atomically read, transform and write a single key.
    ///
    /// The closure sees the current value (if any) and returns the new one.
    /// No other write to any key can interleave.
    pub async fn modify<F>(&self, key: impl Into<String>, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let key = key.into();
        let (next, version) = {
            let mut table = self.table.write().await;
            let current = table.slots.get(&key).and_then(|slot| slot.value.as_ref());
            let next = f(current);
            table.commit(&key, Some(next.clone()), self.history_size);
            (next, table.version)
        };
        self.notify(&key, "set", version);
        next
    }

    /// Copy of every live key and value.
    pub async fn get_all(&self) -> HashMap<String, Value> {
        self.table
            .read()
            .await
            .live()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Write several keys under one lock acquisition.
    pub async fn update(&self, values: HashMap<String, Value>) {
        let mut committed = Vec::with_capacity(values.len());
        {
            let mut table = self.table.write().await;
            for (key, value) in values {
                table.commit(&key, Some(value), self.history_size);
                committed.push((key, table.version));
            }
        }
        for (key, version) in committed {
            self.notify(&key, "set", version);
        }
    }

    /// Delete every live key. History is kept and records the deletions.
    pub async fn clear(&self) -> usize {
        let mut removed = Vec::new();
        {
            let mut table = self.table.write().await;
            let keys: Vec<String> = table.live().map(|(key, _)| key.clone()).collect();
            for key in keys {
                table.commit(&key, None, self.history_size);
                removed.push((key, table.version));
            }
        }
        let count = removed.len();
        for (key, version) in removed {
            self.notify(&key, "delete", version);
        }
        count
    }

    /// Retained changes for `key`, oldest first.
    pub async fn history(&self, key: &str) -> Vec<StateChange> {
        self.table
            .read()
            .await
            .slots
            .get(key)
            .map(|slot| slot.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Live keys in sorted order.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .table
            .read()
            .await
            .live()
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.live().count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of changes committed so far.
    pub async fn version(&self) -> u64 {
        self.table.read().await.version
    }

    /// Serialize the live values as JSON.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub async fn export_snapshot(&self) -> Result<String> {
        let snapshot = {
            let table = self.table.read().await;
            StateSnapshot {
                version: table.version,
                exported_at: Utc::now(),
                values: table
                    .live()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            }
        };
        serde_json::to_string_pretty(&snapshot).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Replace the live values with those in a snapshot.
    ///
    /// Keys absent from the snapshot are deleted. Every change is recorded in
    /// history like an ordinary write.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the input is not a valid snapshot; the
    /// current state is left untouched in that case.
    pub async fn import_snapshot(&self, input: &str) -> Result<usize> {
        let snapshot: StateSnapshot =
            serde_json::from_str(input).map_err(|e| Error::serialization(e.to_string()))?;
        let imported = snapshot.values.len();
        {
            let mut table = self.table.write().await;
            let stale: Vec<String> = table
                .live()
                .filter(|(key, _)| !snapshot.values.contains_key(*key))
                .map(|(key, _)| key.clone())
                .collect();
            for key in stale {
                table.commit(&key, None, self.history_size);
            }
            for (key, value) in snapshot.values {
                table.commit(&key, Some(value), self.history_size);
            }
        }
        debug!(imported, "Imported state snapshot");
        Ok(imported)
    }

    fn notify(&self, key: &str, op: &str, version: u64) {
        if let Some(bus) = &self.bus {
            bus.publish(Event::new(
                STATE_CHANGED_EVENT,
                "state",
                json!({ "key": key, "op": op, "version": version }),
            ));
        }
    }
}

impl Default for StateContext {
    fn default() -> Self {
        Self::new(10)
    }
}

impl std::fmt::Debug for StateContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateContext")
            .field("history_size", &self.history_size)
            .field("publishes_changes", &self.bus.is_some())
            .finish_non_exhaustive()
    }
}
