//! Helpers for running work in the background and observing it.
//!
//! [`background`] wraps a synchronous function so that calling it submits a
//! task instead of running inline. [`wait_for`] and [`watch`] poll a task
//! until it settles; [`task_report`] is the status shape UI layers consume.

use crate::error::{Result, SageError};
use crate::scheduler::runner::TaskEngine;
use crate::scheduler::tasks::{SubmitOptions, TaskId, TaskStatus};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Polling cadence of [`wait_for`].
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default polling cadence for UI status watchers.
pub const UI_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Wrap `f` so each call submits it to `engine` with `options` and returns
/// the new task id.
pub fn background<A, T, E, F>(
    engine: Arc<TaskEngine>,
    options: SubmitOptions,
    f: F,
) -> impl Fn(A) -> TaskId
where
    A: Send + 'static,
    T: Send + Sync + 'static,
    E: std::fmt::Display + 'static,
    F: Fn(A) -> std::result::Result<T, E> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    move |args: A| {
        let f = Arc::clone(&f);
        engine.submit(move || f(args), options.clone())
    }
}

/// How a bounded wait ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<T> {
    Completed(T),
    Failed(String),
    Cancelled,
    /// The id is not (or no longer) tracked by the engine.
    Unknown,
    /// Still pending or running when the timeout expired.
    TimedOut,
}

impl<T> WaitOutcome<T> {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Collapse into a `Result`, describing every non-completed outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Task`] unless the task completed.
    pub fn into_result(self, id: &TaskId) -> Result<T> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Failed(err) => Err(SageError::Task(format!("task {id} failed: {err}"))),
            Self::Cancelled => Err(SageError::Task(format!("task {id} was cancelled"))),
            Self::Unknown => Err(SageError::Task(format!("task {id} is unknown"))),
            Self::TimedOut => Err(SageError::Task(format!("task {id} did not finish in time"))),
        }
    }
}

/// Non-blocking read of where a task stands right now.
fn settled<T: Clone + 'static>(engine: &TaskEngine, id: &TaskId) -> Option<WaitOutcome<T>> {
    match engine.status(id)? {
        TaskStatus::Completed => Some(match engine.result::<T>(id) {
            Some(value) => WaitOutcome::Completed(value),
            None => WaitOutcome::Failed(format!(
                "task {id} completed with a result of an unexpected type"
            )),
        }),
        TaskStatus::Failed => Some(WaitOutcome::Failed(engine.error(id).unwrap_or_default())),
        TaskStatus::Cancelled => Some(WaitOutcome::Cancelled),
        TaskStatus::Pending | TaskStatus::Running => None,
    }
}

/// Block the calling thread until `id` settles or `timeout` expires,
/// checking every [`WAIT_POLL_INTERVAL`].
pub fn wait_for<T: Clone + 'static>(
    engine: &TaskEngine,
    id: &TaskId,
    timeout: Duration,
) -> WaitOutcome<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if engine.status(id).is_none() {
            return WaitOutcome::Unknown;
        }
        if let Some(outcome) = settled(engine, id) {
            return outcome;
        }
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        std::thread::sleep(WAIT_POLL_INTERVAL.min(deadline - now));
    }
}

/// UI-facing task status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport<T> {
    pub task_id: TaskId,
    /// One of the task statuses, or `unknown`.
    pub status: String,
    /// Present iff the task completed.
    pub result: Option<T>,
    pub is_complete: bool,
    pub is_failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> TaskReport<T> {
    /// Whether polling can stop.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.is_complete || self.is_failed || self.status == "cancelled" || self.status == "unknown"
    }
}

/// Current status of `id` in the shape UI layers poll for.
#[must_use]
pub fn task_report<T: Clone + 'static>(engine: &TaskEngine, id: &TaskId) -> TaskReport<T> {
    let Some(status) = engine.status(id) else {
        return TaskReport {
            task_id: id.clone(),
            status: "unknown".to_owned(),
            result: None,
            is_complete: false,
            is_failed: false,
            error: None,
        };
    };
    TaskReport {
        task_id: id.clone(),
        status: status.to_string(),
        result: engine.result::<T>(id),
        is_complete: status == TaskStatus::Completed,
        is_failed: status == TaskStatus::Failed,
        error: engine.error(id),
    }
}

/// Poll `id` every `interval` until it settles, then return its report.
///
/// Suitable for async UI loops; engine reads are non-blocking.
pub async fn watch<T: Clone + 'static>(
    engine: &TaskEngine,
    id: &TaskId,
    interval: Duration,
) -> TaskReport<T> {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    loop {
        ticker.tick().await;
        let report = task_report::<T>(engine, id);
        if report.is_settled() {
            return report;
        }
    }
}
