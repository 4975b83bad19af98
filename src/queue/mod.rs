//! Bucketized work queues and their drivers.
//!
//! A `TaskQueue` tracks every item through `Pending -> InProgress -> {Success | Skipped}`
//! (or back to `Pending` on requeue) under one lock per queue. A `QueueManager`
//! splits incoming items into named child queues by a caller-supplied key, so
//! sibling buckets never share a lock. Drivers pull from a queue and apply a
//! processing function that returns a `Decision`.

mod driver;
mod manager;
mod progress;
mod task_queue;

pub use driver::{Decision, process_concurrent, process_sequential};
pub use manager::QueueManager;
pub use progress::Progress;
pub use task_queue::{ItemState, TaskQueue};

use std::hash::Hash;

/// Anything that can sit in a `TaskQueue`.
pub trait QueueItem: Send {
    /// Identity used for in-progress bookkeeping.
    type Key: Eq + Hash + Clone + Send;

    fn key(&self) -> Self::Key;

    /// Unit of throughput: 1 for plain work items, bytes for IO items.
    fn weight(&self) -> u64 {
        1
    }
}
