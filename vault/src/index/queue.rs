//! Per-range task scheduling.
//!
//! Tasks are queued per range and ranges with pending work wait in a FIFO.
//! `pop` keeps draining the range it is working on before moving to the next
//! ready range, which keeps a fragment's loads and writes together.

use std::collections::{HashMap, VecDeque};

use crate::index::HashRange;

/// FIFO queues of tasks keyed by range.
///
/// # Invariants
///
/// - Tasks of one range are popped in push order.
/// - A range appears in `ready` at most once, and only while it has tasks
///   and is not the current range.
#[derive(Debug)]
pub struct TaskQueue<T> {
    tasks: HashMap<HashRange, VecDeque<T>>,
    ready: VecDeque<HashRange>,
    current: Option<HashRange>,
    len: usize,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self {
            tasks: HashMap::new(),
            ready: VecDeque::new(),
            current: None,
            len: 0,
        }
    }
}

impl<T> TaskQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task to `range`'s queue.
    pub fn push(&mut self, range: HashRange, task: T) {
        let queue = self.tasks.entry(range).or_default();
        if queue.is_empty() && self.current != Some(range) {
            self.ready.push_back(range);
        }
        queue.push_back(task);
        self.len += 1;
    }

    /// Take the next task: the current range's oldest task if it has one,
    /// otherwise the oldest task of the next ready range.
    pub fn pop(&mut self) -> Option<(HashRange, T)> {
        if let Some(range) = self.current {
            if let Some(task) = self.take_front(range) {
                return Some((range, task));
            }
        }
        while let Some(range) = self.ready.pop_front() {
            if let Some(task) = self.take_front(range) {
                self.current = Some(range);
                return Some((range, task));
            }
        }
        self.current = None;
        None
    }

    fn take_front(&mut self, range: HashRange) -> Option<T> {
        let queue = self.tasks.get_mut(&range)?;
        let task = queue.pop_front();
        if queue.is_empty() {
            self.tasks.remove(&range);
        }
        if task.is_some() {
            self.len -= 1;
        }
        task
    }

    /// Whether `range` has no queued tasks.
    #[must_use]
    pub fn is_idle(&self, range: HashRange) -> bool {
        !self.tasks.contains_key(&range)
    }

    /// Of the ranges containing `hash` that have queued tasks, the one whose
    /// tasks will run last.
    ///
    /// A range with queued tasks may have split or merged since, so the
    /// work queued for a hash can sit under any of its ancestors or
    /// descendants.
    #[must_use]
    pub fn last_containing(&self, hash: u64) -> Option<HashRange> {
        self.ready
            .iter()
            .rev()
            .find(|range| range.contains(hash))
            .copied()
            .or_else(|| {
                self.current
                    .filter(|range| range.contains(hash) && self.tasks.contains_key(range))
            })
    }

    /// Total queued tasks.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}
