//! Error types for event handlers.

use thiserror::Error;

/// Result returned by an [`EventHandler`](crate::EventHandler).
pub type HandlerResult = Result<(), HandlerError>;

/// Failure reported by a subscriber while handling an event.
///
/// Handler failures are caught by the bus, logged and counted. They never
/// reach the publisher or the other subscribers of the same publish call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error with a human-readable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<tickloom_core::Error> for HandlerError {
    fn from(err: tickloom_core::Error) -> Self {
        Self::new(err.to_string())
    }
}
