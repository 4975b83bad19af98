//! A single work queue with per-item state tracking.
//!
//! Invariants:
//! - An item is in exactly one of pending / in-progress / success / skipped.
//! - The worker owns the item while it is in progress; only its key stays in the queue.
//! - One mutex guards all sets of one queue.

use chrono::{DateTime, Local};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::trace;

use super::driver::Decision;
use super::progress::Progress;
use super::QueueItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    InProgress,
    Success,
    Skipped,
}

struct Inner<T: QueueItem> {
    pending: VecDeque<T>,
    in_progress: HashMap<T::Key, u64>,
    success: Vec<T>,
    skipped: Vec<T>,
    total_weight: u64,
    done_weight: u64,
    started: Option<(Instant, DateTime<Local>)>,
    finished: Option<(Instant, DateTime<Local>)>,
}

impl<T: QueueItem> Inner<T> {
    fn settle(&mut self) {
        if self.pending.is_empty() && self.in_progress.is_empty() && self.started.is_some() {
            self.finished.get_or_insert_with(|| (Instant::now(), Local::now()));
        }
    }
}

pub struct TaskQueue<T: QueueItem> {
    name: String,
    inner: Mutex<Inner<T>>,
}

impl<T: QueueItem> TaskQueue<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                pending: VecDeque::new(),
                in_progress: HashMap::new(),
                success: Vec::new(),
                skipped: Vec::new(),
                total_weight: 0,
                done_weight: 0,
                started: None,
                finished: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // A panicking worker cannot leave the sets half-updated: every mutation is a
        // single push/remove, so the data behind a poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn enqueue(&self, item: T) {
        let mut inner = self.lock();
        inner.total_weight += item.weight();
        inner.pending.push_back(item);
        inner.finished = None;
    }

    pub fn enqueue_all(&self, items: impl IntoIterator<Item = T>) {
        let mut inner = self.lock();
        for item in items {
            inner.total_weight += item.weight();
            inner.pending.push_back(item);
        }
        inner.finished = None;
    }

    /// Take the next pending item and mark it in progress.
    pub fn dequeue(&self) -> Option<T> {
        let mut inner = self.lock();
        let item = inner.pending.pop_front()?;
        inner.in_progress.insert(item.key(), item.weight());
        inner.started.get_or_insert_with(|| (Instant::now(), Local::now()));
        Some(item)
    }

    /// Move an in-progress item to the state named by `decision`.
    pub fn complete(&self, item: T, decision: Decision) {
        let mut inner = self.lock();
        inner.in_progress.remove(&item.key());
        match decision {
            Decision::Success => {
                inner.done_weight += item.weight();
                inner.success.push(item);
            }
            Decision::Skipped => {
                inner.done_weight += item.weight();
                inner.skipped.push(item);
            }
            Decision::Requeue => {
                trace!(queue = %self.name, "requeued item");
                inner.pending.push_back(item);
            }
        }
        inner.settle();
    }

    pub fn mark_success(&self, item: T) {
        self.complete(item, Decision::Success);
    }

    pub fn mark_skipped(&self, item: T) {
        self.complete(item, Decision::Skipped);
    }

    pub fn requeue(&self, item: T) {
        self.complete(item, Decision::Requeue);
    }

    /// Current state of the item with `key`, if the queue has seen it.
    pub fn state(&self, key: &T::Key) -> Option<ItemState> {
        let inner = self.lock();
        if inner.in_progress.contains_key(key) {
            Some(ItemState::InProgress)
        } else if inner.pending.iter().any(|i| &i.key() == key) {
            Some(ItemState::Pending)
        } else if inner.success.iter().any(|i| &i.key() == key) {
            Some(ItemState::Success)
        } else if inner.skipped.iter().any(|i| &i.key() == key) {
            Some(ItemState::Skipped)
        } else {
            None
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.lock().pending.is_empty()
    }

    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.pending.len() + inner.in_progress.len() + inner.success.len() + inner.skipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drained: nothing pending and nothing in flight.
    pub fn is_drained(&self) -> bool {
        let inner = self.lock();
        inner.pending.is_empty() && inner.in_progress.is_empty()
    }

    pub fn progress(&self) -> Progress {
        let inner = self.lock();
        let elapsed = match (inner.started, inner.finished) {
            (Some((s, _)), Some((f, _))) => f.duration_since(s),
            (Some((s, _)), None) => s.elapsed(),
            _ => Default::default(),
        };
        let pending = inner.pending.len();
        let in_progress = inner.in_progress.len();
        let success = inner.success.len();
        let skipped = inner.skipped.len();
        Progress {
            total: pending + in_progress + success + skipped,
            pending,
            in_progress,
            success,
            skipped,
            total_weight: inner.total_weight,
            done_weight: inner.done_weight,
            started_at: inner.started.map(|(_, at)| at),
            finished_at: inner.finished.map(|(_, at)| at),
            elapsed,
        }
    }

    /// Drain the successful items out of the queue.
    pub fn take_success(&self) -> Vec<T> {
        std::mem::take(&mut self.lock().success)
    }

    /// Drain the skipped items out of the queue.
    pub fn take_skipped(&self) -> Vec<T> {
        std::mem::take(&mut self.lock().skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Job(u32);

    impl QueueItem for Job {
        type Key = u32;
        fn key(&self) -> u32 {
            self.0
        }
        fn weight(&self) -> u64 {
            u64::from(self.0)
        }
    }

    #[test]
    fn items_move_through_states() {
        let q = TaskQueue::new("t");
        q.enqueue_all([Job(1), Job(2), Job(3)]);
        assert_eq!(q.state(&2), Some(ItemState::Pending));

        let a = q.dequeue().unwrap();
        assert_eq!(a, Job(1));
        assert_eq!(q.state(&1), Some(ItemState::InProgress));
        q.mark_success(a);
        assert_eq!(q.state(&1), Some(ItemState::Success));

        let b = q.dequeue().unwrap();
        q.mark_skipped(b);
        assert_eq!(q.state(&2), Some(ItemState::Skipped));

        let p = q.progress();
        assert_eq!((p.total, p.pending, p.success, p.skipped), (3, 1, 1, 1));
        assert_eq!(p.total_weight, 6);
        assert_eq!(p.done_weight, 3);
        assert!(p.finished_at.is_none());
        assert_eq!(q.state(&99), None);
    }

    #[test]
    fn requeue_returns_item_to_the_back() {
        let q = TaskQueue::new("t");
        q.enqueue_all([Job(1), Job(2)]);
        let first = q.dequeue().unwrap();
        q.requeue(first);
        assert_eq!(q.state(&1), Some(ItemState::Pending));
        assert_eq!(q.dequeue().unwrap(), Job(2));
        assert_eq!(q.dequeue().unwrap(), Job(1));
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn finish_is_stamped_once_drained() {
        let q = TaskQueue::new("t");
        q.enqueue(Job(5));
        let j = q.dequeue().unwrap();
        assert!(!q.is_drained());
        q.mark_success(j);
        assert!(q.is_drained());
        let p = q.progress();
        assert!(p.started_at.is_some());
        assert!(p.finished_at.is_some());
        assert!((p.percent() - 100.0).abs() < f64::EPSILON);
        assert_eq!(q.take_success(), vec![Job(5)]);
    }
}
