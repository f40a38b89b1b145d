//! In-process event signalling for agents and the orchestrator.
//!
//! This crate provides the publish/subscribe channel agents use to signal
//! each other and the orchestrator. Key features:
//!
//! - **Event type**: immutable, timestamped records with optional correlation id
//! - **Event bus**: synchronous dispatch to per-type subscribers in subscription order
//! - **Handler isolation**: a failing or panicking handler never blocks the others
//! - **History**: bounded ring of recent events for diagnostic replay
//!
//! # Example
//!
//! ```ignore
//! use tickloom_events::{Event, EventBus, HandlerError};
//! use serde_json::json;
//!
//! let bus = EventBus::new(100);
//!
//! bus.subscribe("task.done", "auditor", |event: &Event| {
//!     tracing::info!(source = event.source(), "task finished");
//!     Ok::<(), HandlerError>(())
//! })?;
//!
//! let report = bus.publish(Event::new("task.done", "planner", json!({ "id": 7 })));
//! assert_eq!(report.delivered, 1);
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod bus;
pub mod error;
pub mod event;
pub mod types;

pub use bus::{BusStats, EventBus, EventHandler, PublishReport, WILDCARD};
pub use error::{HandlerError, HandlerResult};
pub use event::Event;
pub use types::EventId;
