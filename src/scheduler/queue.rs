//! Priority-ordered pending set.
//!
//! Ordering is `(priority desc, sequence asc)`: the sequence number is
//! assigned at submission, so equal priorities come out in FIFO order
//! regardless of how `BinaryHeap` breaks ties internally.

use crate::scheduler::tasks::{TaskBody, TaskId};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A submitted task waiting for dispatch.
pub(crate) struct QueuedTask {
    pub priority: i32,
    pub seq: u64,
    pub id: TaskId,
    pub daemon: bool,
    pub body: TaskBody,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
pub(crate) struct PendingQueue {
    heap: BinaryHeap<QueuedTask>,
}

impl PendingQueue {
    pub fn push(&mut self, task: QueuedTask) {
        self.heap.push(task);
    }

    pub fn pop(&mut self) -> Option<QueuedTask> {
        self.heap.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Whether the next task to pop would dispatch before `task`.
    pub fn outranks(&self, task: &QueuedTask) -> bool {
        self.heap.peek().is_some_and(|top| top > task)
    }

    /// Ids in the order they would be dispatched.
    pub fn ids_in_dispatch_order(&self) -> Vec<TaskId> {
        let mut keys: Vec<(i32, u64, &TaskId)> = self
            .heap
            .iter()
            .map(|task| (task.priority, task.seq, &task.id))
            .collect();
        keys.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        keys.into_iter().map(|(_, _, id)| id.clone()).collect()
    }
}
