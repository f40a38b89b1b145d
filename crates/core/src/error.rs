//! Core error types for tickloom operations.
//!
//! Structural errors are returned synchronously to the caller of the violated
//! operation. Execution failures are recorded on the work item or agent
//! statistics and only surface through later queries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Explicit classification carried by every [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed submission or argument.
    Validation,
    /// Unknown work item id or agent name.
    NotFound,
    /// Cancel attempted on an item that is no longer queued.
    NotCancellable,
    /// Agent name collision.
    DuplicateName,
    /// A work function or agent hook failed.
    Execution,
    /// Operation attempted after shutdown began.
    ShutdownInProgress,
    /// Configuration rejected.
    Config,
    /// Lifecycle operation invoked twice.
    AlreadyStarted,
    /// Parse or serialization failure.
    Serialization,
    /// Underlying I/O failure.
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::NotCancellable => "not_cancellable",
            Self::DuplicateName => "duplicate_name",
            Self::Execution => "execution",
            Self::ShutdownInProgress => "shutdown_in_progress",
            Self::Config => "config",
            Self::AlreadyStarted => "already_started",
            Self::Serialization => "serialization",
            Self::Io => "io",
        };
        write!(f, "{name}")
    }
}

/// Core error type for tickloom operations.
#[derive(Debug, Error)]
pub enum Error {
    // Structural errors
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("work item '{id}' cannot be cancelled while {status}")]
    NotCancellable { id: String, status: String },

    #[error("agent '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("shutdown in progress: {operation} rejected")]
    ShutdownInProgress { operation: String },

    // Recorded failures
    #[error("execution of '{target}' failed: {reason}")]
    Execution { target: String, reason: String },

    // Lifecycle and configuration
    #[error("invalid configuration for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("{component} already started")]
    AlreadyStarted { component: String },

    // Parsing errors
    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a not-found error for the given entity kind.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create a not-cancellable error.
    pub fn not_cancellable(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self::NotCancellable {
            id: id.into(),
            status: status.into(),
        }
    }

    /// Create a duplicate-name error.
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    /// Create a shutdown-in-progress error.
    pub fn shutdown_in_progress(operation: impl Into<String>) -> Self {
        Self::ShutdownInProgress {
            operation: operation.into(),
        }
    }

    /// Create an execution error.
    pub fn execution(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an already-started error.
    pub fn already_started(component: impl Into<String>) -> Self {
        Self::AlreadyStarted {
            component: component.into(),
        }
    }

    /// Create a TOML parse error.
    pub fn toml_parse_failed(reason: impl Into<String>) -> Self {
        Self::TomlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// The explicit kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NotCancellable { .. } => ErrorKind::NotCancellable,
            Self::DuplicateName { .. } => ErrorKind::DuplicateName,
            Self::ShutdownInProgress { .. } => ErrorKind::ShutdownInProgress,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::InvalidConfig { .. } => ErrorKind::Config,
            Self::AlreadyStarted { .. } => ErrorKind::AlreadyStarted,
            Self::TomlParseFailed { .. } | Self::Serialization { .. } => ErrorKind::Serialization,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the error was returned synchronously by a violated contract.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation
                | ErrorKind::NotFound
                | ErrorKind::NotCancellable
                | ErrorKind::DuplicateName
                | ErrorKind::ShutdownInProgress
        )
    }
}
