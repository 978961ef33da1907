//! Summarization routed through the task engine.

use crate::config::TaskEngineConfig;
use crate::error::{Result, SageError};
use crate::memory::classify::{Summarizer, SummaryKind};
use crate::scheduler::{SubmitOptions, TaskEngine, WaitOutcome, wait_for};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Runs another [`Summarizer`] as an engine task and waits for it.
///
/// The engine must be started; otherwise every call waits out the timeout
/// and the store falls back to its local summary. Calls made from one of the
/// engine's own tasks run `inner` directly, since waiting there could hold
/// the only free worker.
pub struct EngineSummarizer {
    engine: Arc<TaskEngine>,
    inner: Arc<dyn Summarizer>,
    priority: i32,
    timeout: Duration,
}

impl EngineSummarizer {
    /// Priority and timeout come from `summarize_priority` and
    /// `summarize_timeout_secs`.
    #[must_use]
    pub fn new(engine: Arc<TaskEngine>, inner: Arc<dyn Summarizer>, config: &TaskEngineConfig) -> Self {
        Self {
            engine,
            inner,
            priority: config.summarize_priority,
            timeout: config.summarize_timeout(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Summarizer for EngineSummarizer {
    fn summarize(&self, kind: SummaryKind, transcript: &str) -> Result<String> {
        if self.engine.is_engine_thread() {
            debug!("summary requested from an engine task, running inline");
            return self.inner.summarize(kind, transcript);
        }
        let inner = Arc::clone(&self.inner);
        let text = transcript.to_owned();
        let id = self.engine.submit(
            move || inner.summarize(kind, &text),
            SubmitOptions::default()
                .with_priority(self.priority)
                .with_label("memory-summary"),
        );

        match wait_for::<String>(&self.engine, &id, self.timeout) {
            WaitOutcome::TimedOut => {
                if self.engine.cancel(&id) {
                    warn!("summary task {id} never started, cancelled");
                }
                Err(SageError::Task(format!(
                    "summary task {id} did not finish within {} ms",
                    self.timeout.as_millis()
                )))
            }
            outcome => outcome.into_result(&id),
        }
    }
}
