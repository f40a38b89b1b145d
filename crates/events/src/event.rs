//! Event record published on the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::EventId;

/// A signal published on the [`EventBus`](crate::EventBus).
///
/// Events are immutable once constructed; the bus shares them between
/// subscribers and its history behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    event_type: String,
    source: String,
    data: serde_json::Value,
    timestamp: DateTime<Utc>,
    correlation_id: Option<String>,
}

impl Event {
    /// Create a new event stamped with the current time.
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            source: source.into(),
            data,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    /// Create an event without a payload.
    pub fn signal(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(event_type, source, serde_json::Value::Null)
    }

    /// Attach a correlation id linking this event to a request or work item.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Event identifier.
    #[must_use]
    pub const fn id(&self) -> EventId {
        self.id
    }

    /// Type tag used for subscription routing.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Identity of the producer.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Opaque payload.
    #[must_use]
    pub const fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// Creation time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Optional correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}
