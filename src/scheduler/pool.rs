//! Bounded worker pool for daemon tasks.
//!
//! Work is handed over through a zero-capacity (rendezvous) channel, so a
//! send succeeds only when a worker is idle and waiting. The dispatcher keeps
//! priority order because nothing queues up behind the pool.

use crate::error::{Result, SageError};
use crossbeam_channel::{SendTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Why a hand-over did not happen. The item is returned in both cases.
pub(crate) enum HandOff<J> {
    /// No worker became idle within the wait.
    Busy(J),
    /// Every worker has exited.
    Closed(J),
}

pub(crate) struct WorkerPool<J> {
    tx: Sender<J>,
    workers: usize,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Spawn `workers` threads that run `handler` on every item they receive.
    ///
    /// Dropping the pool disconnects the channel: idle workers exit at once,
    /// busy workers exit after their current item. Nobody waits for them.
    pub fn spawn<H>(workers: usize, handler: H) -> Result<Self>
    where
        H: Fn(J) + Send + Sync + 'static,
    {
        let workers = workers.max(1);
        let (tx, rx) = crossbeam_channel::bounded::<J>(0);
        let handler = Arc::new(handler);

        for index in 0..workers {
            let rx = rx.clone();
            let handler = Arc::clone(&handler);
            std::thread::Builder::new()
                .name(format!("sage-worker-{index}"))
                .spawn(move || {
                    while let Ok(item) = rx.recv() {
                        handler(item);
                    }
                    debug!("worker {index} exiting");
                })
                .map_err(|e| SageError::Task(format!("failed to spawn worker thread: {e}")))?;
        }

        Ok(Self { tx, workers })
    }

    /// Hand `item` to an idle worker, waiting at most `wait`.
    pub fn try_hand_off(&self, item: J, wait: Duration) -> std::result::Result<(), HandOff<J>> {
        self.tx.send_timeout(item, wait).map_err(|e| match e {
            SendTimeoutError::Timeout(item) => HandOff::Busy(item),
            SendTimeoutError::Disconnected(item) => HandOff::Closed(item),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}
