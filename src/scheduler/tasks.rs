//! Task definitions: ids, lifecycle status, submit options, and snapshots.
//!
//! A task is owned by the [`TaskEngine`](super::runner::TaskEngine) from
//! submission until it reaches a terminal status; afterwards it is read-only
//! and can only be observed through [`TaskSnapshot`] / [`TaskCompletion`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

/// Type-erased task result. Read back with
/// [`TaskEngine::result`](super::runner::TaskEngine::result).
pub type TaskOutput = Arc<dyn Any + Send + Sync>;

/// Callback invoked once when a task reaches a terminal status.
pub type CompletionCallback = Box<dyn FnOnce(&TaskCompletion) + Send>;

/// Wrapped callable: arguments are captured by the closure, the error is
/// already rendered to text.
pub(crate) type TaskBody = Box<dyn FnOnce() -> Result<TaskOutput, String> + Send>;

/// Opaque unique task identifier (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub(crate) fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Lifecycle status. Transitions only move forward:
/// `Pending → Running → {Completed, Failed}` or `Pending → {Cancelled, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a task should be scheduled.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Higher values are dispatched first.
    pub priority: i32,
    /// Daemon tasks run on the bounded worker pool and may be abandoned at
    /// shutdown. Non-daemon tasks get a dedicated thread that `stop` joins.
    pub daemon: bool,
    /// Optional label for logs and snapshots.
    pub label: Option<String>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            daemon: true,
            label: None,
        }
    }
}

impl SubmitOptions {
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Run on a dedicated thread that outlives a forced shutdown.
    #[must_use]
    pub fn non_daemon(mut self) -> Self {
        self.daemon = false;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Mutable per-task state held in the engine's task map.
pub(crate) struct TaskRecord {
    pub id: TaskId,
    pub label: Option<String>,
    pub priority: i32,
    pub daemon: bool,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<TaskOutput>,
    pub error: Option<String>,
    pub callbacks: Vec<CompletionCallback>,
}

impl TaskRecord {
    pub fn new(id: TaskId, options: &SubmitOptions) -> Self {
        Self {
            id,
            label: options.label.clone(),
            priority: options.priority,
            daemon: options.daemon,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            callbacks: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let execution_time_ms = match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        };
        TaskSnapshot {
            id: self.id.clone(),
            label: self.label.clone(),
            status: self.status,
            priority: self.priority,
            daemon: self.daemon,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            execution_time_ms,
            error: self.error.clone(),
        }
    }

    pub fn completion(&self) -> TaskCompletion {
        TaskCompletion {
            snapshot: self.snapshot(),
            output: self.result.clone(),
        }
    }
}

/// Point-in-time, serializable view of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub status: TaskStatus,
    pub priority: i32,
    pub daemon: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// `completed_at - started_at`, once both exist.
    #[serde(default)]
    pub execution_time_ms: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// What a completion callback receives.
#[derive(Clone)]
pub struct TaskCompletion {
    pub snapshot: TaskSnapshot,
    output: Option<TaskOutput>,
}

impl TaskCompletion {
    /// The task result, if it completed with a value of type `T`.
    #[must_use]
    pub fn output<T: Clone + 'static>(&self) -> Option<T> {
        self.output
            .as_ref()
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }
}

impl std::fmt::Debug for TaskCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCompletion")
            .field("snapshot", &self.snapshot)
            .field("has_output", &self.output.is_some())
            .finish()
    }
}
