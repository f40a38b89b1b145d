//! Work item record and the capability used to execute it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::{Error, Result};

/// Unique identifier for a work item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkId(String);

impl WorkId {
    /// Generate a new unique work id.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("work-{}", Uuid::new_v4()))
    }

    /// Wrap an existing id string.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
}

impl WorkStatus {
    /// Whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }

    /// Whether `next` is a legal successor of this status.
    ///
    /// Legal paths are `queued -> running -> done | error` and
    /// `queued -> cancelled`. Nothing leaves a terminal status.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Done | Self::Error)
        )
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// One schedulable unit of work.
///
/// Identity, name, priority and payload are fixed at creation. Status,
/// timestamps, error and result are only changed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkId,
    pub name: String,
    pub priority: i32,
    pub payload: Value,
    pub status: WorkStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Value>,
}

impl WorkItem {
    /// Create a new queued work item.
    pub fn new(name: impl Into<String>, priority: i32, payload: Value) -> Self {
        Self {
            id: WorkId::new(),
            name: name.into(),
            priority,
            payload,
            status: WorkStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }

    /// Check the item is acceptable for submission.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the name is blank, the priority is
    /// negative or the item is no longer queued.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("work item name must not be empty"));
        }
        if self.priority < 0 {
            return Err(Error::validation(format!(
                "work item '{}' has negative priority {}",
                self.name, self.priority
            )));
        }
        if self.status != WorkStatus::Queued {
            return Err(Error::validation(format!(
                "work item '{}' must be submitted as queued, found {}",
                self.name, self.status
            )));
        }
        Ok(())
    }

    /// Move to `next`, stamping the matching timestamp.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a transition outside the lifecycle.
    pub fn transition_to(&mut self, next: WorkStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::validation(format!(
                "illegal status transition {} -> {} for '{}'",
                self.status, next, self.id
            )));
        }
        let now = Utc::now();
        if next == WorkStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Wall-clock execution time, once both timestamps are known.
    #[must_use]
    pub fn execution_duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Failure raised by a work function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionError {
    message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ExecutionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ExecutionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<Error> for ExecutionError {
    fn from(error: Error) -> Self {
        Self::new(error.to_string())
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(format!("payload error: {error}"))
    }
}

/// Result type returned by work functions.
pub type ExecutionResult = std::result::Result<Value, ExecutionError>;

/// Capability supplied with each submission: run the payload, produce a value.
#[async_trait]
pub trait Executable: Send + Sync {
    async fn execute(&self, payload: &Value) -> ExecutionResult;
}

/// Adapter turning an async closure into an [`Executable`].
pub struct FnExecutable<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> Executable for FnExecutable<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = ExecutionResult> + Send,
{
    async fn execute(&self, payload: &Value) -> ExecutionResult {
        (self.func)(payload.clone()).await
    }
}

/// Wrap an async closure taking the payload by value.
///
/// ```ignore
/// let work = work_fn(|payload| async move { Ok(payload) });
/// orchestrator.submit(WorkItem::new("echo", 1, json!(1)), work)?;
/// ```
pub fn work_fn<F, Fut>(func: F) -> Arc<dyn Executable>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecutionResult> + Send + 'static,
{
    Arc::new(FnExecutable { func })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_work_id_is_prefixed_and_unique() {
        let a = WorkId::new();
        let b = WorkId::new();
        assert!(a.as_str().starts_with("work-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        use WorkStatus::{Cancelled, Done, Error as Failed, Queued, Running};

        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Done));
        assert!(Running.can_transition_to(Failed));

        assert!(!Running.can_transition_to(Cancelled));
        assert!(!Running.can_transition_to(Queued));
        assert!(!Queued.can_transition_to(Done));
        for terminal in [Done, Failed, Cancelled] {
            for next in [Queued, Running, Done, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_transition_stamps_timestamps() {
        let mut item = WorkItem::new("job", 1, json!(null));
        item.transition_to(WorkStatus::Running).unwrap();
        assert!(item.started_at.is_some());
        assert!(item.completed_at.is_none());

        item.transition_to(WorkStatus::Done).unwrap();
        assert!(item.completed_at.is_some());
        assert!(item.execution_duration().is_some());
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let mut item = WorkItem::new("job", 1, json!(null));
        item.transition_to(WorkStatus::Cancelled).unwrap();
        assert!(item.transition_to(WorkStatus::Queued).is_err());
        assert_eq!(item.status, WorkStatus::Cancelled);
    }

    #[test]
    fn test_validate_rejects_blank_name_and_negative_priority() {
        assert!(WorkItem::new("  ", 1, json!(null)).validate().is_err());
        assert!(WorkItem::new("job", -1, json!(null)).validate().is_err());
        assert!(WorkItem::new("job", 0, json!(null)).validate().is_ok());
    }

    #[tokio::test]
    async fn test_work_fn_receives_payload() {
        let work = work_fn(|payload| async move {
            match payload["n"].as_i64() {
                Some(n) => Ok(json!(n * 2)),
                None => Err(ExecutionError::new("missing n")),
            }
        });
        let out = work.execute(&json!({ "n": 21 })).await;
        assert_eq!(out, Ok(json!(42)));

        let failed = work.execute(&json!({})).await;
        assert_eq!(failed.map_err(|e| e.message().to_string()), Err("missing n".to_string()));
    }
}
