//! Background task engine.
//!
//! Prioritized, cancellable background work with status tracking: a single
//! dispatch thread feeds a bounded worker pool (daemon tasks) or dedicated
//! joinable threads (non-daemon tasks).

pub mod background;
mod pool;
mod queue;
pub mod runner;
pub mod tasks;

pub use background::{
    TaskReport, UI_POLL_INTERVAL, WAIT_POLL_INTERVAL, WaitOutcome, background, task_report,
    wait_for, watch,
};
pub use runner::TaskEngine;
pub use tasks::{
    CompletionCallback, SubmitOptions, TaskCompletion, TaskId, TaskOutput, TaskSnapshot,
    TaskStatus,
};
