//! Priority task engine.
//!
//! One dispatch thread per engine pops the highest-priority pending task and
//! hands it to execution: daemon tasks go to the bounded [`WorkerPool`],
//! non-daemon tasks get a dedicated thread that [`TaskEngine::stop`] joins
//! with a bounded per-thread timeout.
//!
//! Only the pending heap and the task map are shared between threads. A task
//! body never runs while either lock is held.

use crate::config::TaskEngineConfig;
use crate::error::{Result, SageError};
use crate::scheduler::pool::{HandOff, WorkerPool};
use crate::scheduler::queue::{PendingQueue, QueuedTask};
use crate::scheduler::tasks::{
    CompletionCallback, SubmitOptions, TaskCompletion, TaskId, TaskOutput, TaskRecord,
    TaskSnapshot, TaskStatus,
};
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::cell::Cell;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Longest single wait for an idle worker before the heap is checked again.
const HAND_OFF_SLICE: Duration = Duration::from_millis(5);

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Engine whose task (or completion callback) this thread is running.
    static CURRENT_ENGINE: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Marks the current thread as running a task of one engine until dropped.
struct EngineThreadMark {
    previous: Option<u64>,
}

impl EngineThreadMark {
    fn enter(engine_id: u64) -> Self {
        Self {
            previous: CURRENT_ENGINE.with(|current| current.replace(Some(engine_id))),
        }
    }
}

impl Drop for EngineThreadMark {
    fn drop(&mut self) {
        CURRENT_ENGINE.with(|current| current.set(self.previous));
    }
}

/// A dedicated thread running a non-daemon task.
struct LiveThread {
    id: TaskId,
    handle: JoinHandle<()>,
    done_rx: Receiver<()>,
}

struct Shared {
    engine_id: u64,
    queue: Mutex<PendingQueue>,
    available: Condvar,
    tasks: Mutex<HashMap<TaskId, TaskRecord>>,
    live: Mutex<Vec<LiveThread>>,
    running: AtomicBool,
    next_seq: AtomicU64,
}

/// Background task engine with priority dispatch.
///
/// Construct one per application and share it (`Arc<TaskEngine>`) with the
/// components that submit work; there is no global instance.
pub struct TaskEngine {
    shared: Arc<Shared>,
    config: TaskEngineConfig,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("task panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("task panicked: {s}")
    } else {
        "task panicked".to_owned()
    }
}

fn deliver(callbacks: Vec<CompletionCallback>, completion: &TaskCompletion) {
    for callback in callbacks {
        if std::panic::catch_unwind(AssertUnwindSafe(|| callback(completion))).is_err() {
            error!("completion callback for task {} panicked", completion.snapshot.id);
        }
    }
}

impl Shared {
    fn enqueue(&self, task: QueuedTask) {
        lock(&self.queue).push(task);
        self.available.notify_one();
    }

    /// Wait up to `timeout` for a pending task; `None` on timeout or shutdown.
    fn next_pending(&self, timeout: Duration) -> Option<QueuedTask> {
        let guard = lock(&self.queue);
        let (mut guard, _) = self
            .available
            .wait_timeout_while(guard, timeout, |queue| {
                queue.is_empty() && self.running.load(Ordering::Acquire)
            })
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !self.running.load(Ordering::Acquire) {
            return None;
        }
        guard.pop()
    }

    /// Whether the heap holds a task that should run before `task`.
    fn outranked(&self, task: &QueuedTask) -> bool {
        lock(&self.queue).outranks(task)
    }

    fn is_pending(&self, id: &TaskId) -> bool {
        lock(&self.tasks)
            .get(id)
            .is_some_and(|record| record.status == TaskStatus::Pending)
    }

    /// Pending → Running. Returns `false` if the task was cancelled meanwhile.
    fn mark_running(&self, id: &TaskId) -> bool {
        let mut tasks = lock(&self.tasks);
        match tasks.get_mut(id) {
            Some(record) if record.status == TaskStatus::Pending => {
                record.status = TaskStatus::Running;
                record.started_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Run one task to a terminal status. Never panics, never propagates.
    fn execute(&self, task: QueuedTask) {
        let _mark = EngineThreadMark::enter(self.engine_id);
        let QueuedTask { id, body, .. } = task;
        if !self.mark_running(&id) {
            debug!("task {id} is no longer pending, skipping");
            return;
        }
        debug!("task {id} running");

        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(outcome) => outcome,
            Err(payload) => Err(panic_message(payload)),
        };
        self.finish(&id, outcome);
    }

    fn finish(&self, id: &TaskId, outcome: std::result::Result<TaskOutput, String>) {
        let (completion, callbacks) = {
            let mut tasks = lock(&self.tasks);
            let Some(record) = tasks.get_mut(id) else {
                warn!("finished task {id} is missing from the task map");
                return;
            };
            match outcome {
                Ok(value) => {
                    record.result = Some(value);
                    record.status = TaskStatus::Completed;
                    debug!("task {id} completed");
                }
                Err(err) => {
                    warn!("task {id} failed: {err}");
                    record.error = Some(err);
                    record.status = TaskStatus::Failed;
                }
            }
            record.completed_at = Some(Utc::now());
            (record.completion(), std::mem::take(&mut record.callbacks))
        };
        deliver(callbacks, &completion);
    }

    /// Pending → Failed for a task that could not be started at all.
    fn fail_unstarted(&self, id: &TaskId, reason: String) {
        let (completion, callbacks) = {
            let mut tasks = lock(&self.tasks);
            let Some(record) = tasks.get_mut(id) else {
                return;
            };
            if record.status != TaskStatus::Pending {
                return;
            }
            record.status = TaskStatus::Failed;
            record.error = Some(reason);
            record.completed_at = Some(Utc::now());
            (record.completion(), std::mem::take(&mut record.callbacks))
        };
        deliver(callbacks, &completion);
    }

    fn spawn_dedicated(self: &Arc<Self>, task: QueuedTask) {
        let id = task.id.clone();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let shared = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("sage-task-{}", &id.as_str()[..8.min(id.as_str().len())]))
            .spawn(move || {
                shared.execute(task);
                let _ = done_tx.send(());
            });

        match spawned {
            Ok(handle) => {
                debug!("task {id} running on a dedicated thread");
                lock(&self.live).push(LiveThread {
                    id,
                    handle,
                    done_rx,
                });
            }
            Err(e) => {
                error!("failed to spawn thread for task {id}: {e}");
                self.fail_unstarted(&id, format!("failed to spawn task thread: {e}"));
            }
        }
    }

    /// Drop bookkeeping for dedicated threads that already exited.
    fn reap_finished(&self) {
        let mut live = lock(&self.live);
        let (finished, still_running): (Vec<_>, Vec<_>) =
            live.drain(..).partition(|thread| thread.handle.is_finished());
        *live = still_running;
        drop(live);
        for thread in finished {
            if thread.handle.join().is_err() {
                error!("dedicated thread for task {} panicked", thread.id);
            }
        }
    }
}

fn dispatch_loop(shared: Arc<Shared>, pool: WorkerPool<QueuedTask>, poll: Duration) {
    info!("dispatch loop started ({} workers)", pool.workers());
    while shared.running.load(Ordering::Acquire) {
        shared.reap_finished();
        let Some(task) = shared.next_pending(poll) else {
            continue;
        };
        if !shared.is_pending(&task.id) {
            debug!("skipping task {} (not pending)", task.id);
            continue;
        }

        if !task.daemon {
            shared.spawn_dedicated(task);
            continue;
        }

        hand_off(&shared, &pool, task, poll);
    }
    debug!("dispatch loop exiting");
}

/// Give `task` to the first idle worker within `poll`.
///
/// The wait is sliced so that a higher-priority task arriving meanwhile
/// sends this one back to the heap; only a task arriving inside the final
/// slice can lose to it.
fn hand_off(shared: &Shared, pool: &WorkerPool<QueuedTask>, mut task: QueuedTask, poll: Duration) {
    let deadline = Instant::now() + poll;
    loop {
        match pool.try_hand_off(task, HAND_OFF_SLICE.min(poll)) {
            Ok(()) => return,
            Err(HandOff::Busy(back)) => {
                if Instant::now() >= deadline
                    || !shared.running.load(Ordering::Acquire)
                    || shared.outranked(&back)
                {
                    // Original key, so FIFO order among equals survives.
                    shared.enqueue(back);
                    return;
                }
                task = back;
            }
            Err(HandOff::Closed(back)) => {
                error!("worker pool closed, running task {} on the dispatch thread", back.id);
                shared.execute(back);
                return;
            }
        }
    }
}

impl TaskEngine {
    /// Create an engine. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(config: TaskEngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine_id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
                queue: Mutex::new(PendingQueue::default()),
                available: Condvar::new(),
                tasks: Mutex::new(HashMap::new()),
                live: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                next_seq: AtomicU64::new(0),
            }),
            config,
            dispatcher: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TaskEngineConfig {
        &self.config
    }

    /// Start the dispatch loop and the worker pool. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Task`] if the worker or dispatch threads cannot
    /// be spawned.
    pub fn start(&self) -> Result<()> {
        let mut dispatcher = lock(&self.dispatcher);
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let handler_shared = Arc::clone(&self.shared);
        let pool = match WorkerPool::spawn(self.config.workers, move |task: QueuedTask| {
            handler_shared.execute(task);
        }) {
            Ok(pool) => pool,
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let shared = Arc::clone(&self.shared);
        let poll = self.config.poll_interval();
        let handle = std::thread::Builder::new()
            .name("sage-dispatch".to_owned())
            .spawn(move || dispatch_loop(shared, pool, poll))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                SageError::Task(format!("failed to spawn dispatch thread: {e}"))
            })?;
        *dispatcher = Some(handle);
        info!("task engine started");
        Ok(())
    }

    /// Stop dispatching, join dedicated threads (bounded per thread), and
    /// release the worker pool without waiting for in-flight daemon work.
    ///
    /// Safe to call repeatedly and before [`start`](Self::start). Tasks still
    /// pending stay pending and run after a later `start`.
    pub fn stop(&self) {
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        self.shared.available.notify_all();

        if let Some(handle) = lock(&self.dispatcher).take() {
            if handle.join().is_err() {
                error!("dispatch thread panicked");
            }
        }

        let live: Vec<LiveThread> = lock(&self.shared.live).drain(..).collect();
        let timeout = self.config.join_timeout();
        for thread in live {
            match thread.done_rx.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if thread.handle.join().is_err() {
                        error!("dedicated thread for task {} panicked", thread.id);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "task {} still running after {} ms, detaching its thread",
                        thread.id,
                        timeout.as_millis()
                    );
                }
            }
        }

        if was_running {
            info!("task engine stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// True when called from inside one of this engine's task bodies or
    /// completion callbacks. Blocking such a thread on another task of the
    /// same engine can starve the pool.
    #[must_use]
    pub fn is_engine_thread(&self) -> bool {
        CURRENT_ENGINE.with(Cell::get) == Some(self.shared.engine_id)
    }

    /// Enqueue `f` as a new Pending task. Never blocks on execution.
    ///
    /// `f` captures its arguments. An `Err` return or a panic marks the task
    /// Failed with the rendered error.
    pub fn submit<F, T, E>(&self, f: F, options: SubmitOptions) -> TaskId
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + Sync + 'static,
        E: std::fmt::Display + 'static,
    {
        self.enqueue_new(f, options, Vec::new())
    }

    /// [`submit`](Self::submit) with a completion callback attached.
    pub fn submit_with_callback<F, T, E, C>(
        &self,
        f: F,
        options: SubmitOptions,
        callback: C,
    ) -> TaskId
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + Sync + 'static,
        E: std::fmt::Display + 'static,
        C: FnOnce(&TaskCompletion) + Send + 'static,
    {
        // Registered before enqueueing so the callback cannot be missed.
        self.enqueue_new(f, options, vec![Box::new(callback)])
    }

    fn enqueue_new<F, T, E>(
        &self,
        f: F,
        options: SubmitOptions,
        callbacks: Vec<CompletionCallback>,
    ) -> TaskId
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + Sync + 'static,
        E: std::fmt::Display + 'static,
    {
        let id = TaskId::generate();
        let mut record = TaskRecord::new(id.clone(), &options);
        record.callbacks = callbacks;
        lock(&self.shared.tasks).insert(id.clone(), record);

        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        debug!(
            "task {id} submitted (priority={}, daemon={}, label={:?})",
            options.priority, options.daemon, options.label
        );
        self.shared.enqueue(QueuedTask {
            priority: options.priority,
            seq,
            id: id.clone(),
            daemon: options.daemon,
            body: Box::new(move || {
                f().map(|value| Arc::new(value) as TaskOutput)
                    .map_err(|e| e.to_string())
            }),
        });
        id
    }

    /// Register a callback for when `id` reaches a terminal status.
    ///
    /// Fires immediately if the task is already terminal. Returns `false`
    /// for unknown ids.
    pub fn on_complete<C>(&self, id: &TaskId, callback: C) -> bool
    where
        C: FnOnce(&TaskCompletion) + Send + 'static,
    {
        let completion = {
            let mut tasks = lock(&self.shared.tasks);
            let Some(record) = tasks.get_mut(id) else {
                return false;
            };
            if !record.status.is_terminal() {
                record.callbacks.push(Box::new(callback));
                return true;
            }
            record.completion()
        };
        deliver(vec![Box::new(callback)], &completion);
        true
    }

    /// Cancel a task that has not started. Returns `false` for running,
    /// terminal, or unknown tasks, leaving them untouched.
    pub fn cancel(&self, id: &TaskId) -> bool {
        let (completion, callbacks) = {
            let mut tasks = lock(&self.shared.tasks);
            let Some(record) = tasks.get_mut(id) else {
                return false;
            };
            if record.status != TaskStatus::Pending {
                return false;
            }
            record.status = TaskStatus::Cancelled;
            record.completed_at = Some(Utc::now());
            (record.completion(), std::mem::take(&mut record.callbacks))
        };
        debug!("task {id} cancelled");
        deliver(callbacks, &completion);
        true
    }

    #[must_use]
    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        lock(&self.shared.tasks).get(id).map(|record| record.status)
    }

    /// The result of a Completed task, downcast to `T`.
    ///
    /// `None` unless the task is Completed and produced a `T`.
    #[must_use]
    pub fn result<T: Clone + 'static>(&self, id: &TaskId) -> Option<T> {
        self.output(id)
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }

    /// The type-erased result of a Completed task.
    #[must_use]
    pub fn output(&self, id: &TaskId) -> Option<TaskOutput> {
        let tasks = lock(&self.shared.tasks);
        let record = tasks.get(id)?;
        if record.status != TaskStatus::Completed {
            return None;
        }
        record.result.clone()
    }

    /// The error text of a Failed task.
    #[must_use]
    pub fn error(&self, id: &TaskId) -> Option<String> {
        let tasks = lock(&self.shared.tasks);
        let record = tasks.get(id)?;
        if record.status != TaskStatus::Failed {
            return None;
        }
        record.error.clone()
    }

    #[must_use]
    pub fn snapshot(&self, id: &TaskId) -> Option<TaskSnapshot> {
        lock(&self.shared.tasks).get(id).map(TaskRecord::snapshot)
    }

    /// Snapshots of every tracked task, oldest first.
    #[must_use]
    pub fn all_tasks(&self) -> Vec<TaskSnapshot> {
        let mut snapshots: Vec<TaskSnapshot> = lock(&self.shared.tasks)
            .values()
            .map(TaskRecord::snapshot)
            .collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshots
    }

    /// Ids of Pending tasks in dispatch order.
    #[must_use]
    pub fn pending_tasks(&self) -> Vec<TaskId> {
        let queued = lock(&self.shared.queue).ids_in_dispatch_order();
        let tasks = lock(&self.shared.tasks);
        queued
            .into_iter()
            .filter(|id| {
                tasks
                    .get(id)
                    .is_some_and(|record| record.status == TaskStatus::Pending)
            })
            .collect()
    }

    /// Evict terminal tasks that completed more than `max_age` ago.
    ///
    /// Returns the number of evicted tasks.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let now = Utc::now();
        let mut tasks = lock(&self.shared.tasks);
        let before = tasks.len();
        tasks.retain(|_, record| {
            let expired = record.status.is_terminal()
                && record
                    .completed_at
                    .is_some_and(|completed| now - completed > max_age);
            !expired
        });
        let evicted = before - tasks.len();
        if evicted > 0 {
            debug!("evicted {evicted} finished tasks");
        }
        evicted
    }

    /// [`cleanup`](Self::cleanup) with the configured default age.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup(self.config.cleanup_max_age())
    }
}

impl Default for TaskEngine {
    fn default() -> Self {
        Self::new(TaskEngineConfig::default())
    }
}

impl Drop for TaskEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
