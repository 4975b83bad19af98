//! Bucketizing front-end over a set of named `TaskQueue`s.
//!
//! Items are routed to a child queue by a caller-supplied key function: source
//! name for enumeration, share name for evaluation, destination name for IO.
//! Sibling queues do not share a lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::QueueItem;
use super::progress::Progress;
use super::task_queue::TaskQueue;

type KeyFn<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

pub struct QueueManager<T: QueueItem> {
    name: String,
    key_fn: KeyFn<T>,
    buckets: Mutex<BTreeMap<String, Arc<TaskQueue<T>>>>,
}

impl<T: QueueItem> QueueManager<T> {
    pub fn new(name: impl Into<String>, key_fn: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            key_fn: Box::new(key_fn),
            buckets: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<TaskQueue<T>>>> {
        self.buckets.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Route `item` to its bucket, creating the bucket on first use.
    pub fn enqueue(&self, item: T) {
        let bucket = (self.key_fn)(&item);
        let queue = {
            let mut buckets = self.lock();
            buckets
                .entry(bucket.clone())
                .or_insert_with(|| {
                    debug!(manager = %self.name, bucket = %bucket, "created bucket");
                    Arc::new(TaskQueue::new(bucket.clone()))
                })
                .clone()
        };
        queue.enqueue(item);
    }

    pub fn enqueue_all(&self, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.enqueue(item);
        }
    }

    pub fn bucket(&self, name: &str) -> Option<Arc<TaskQueue<T>>> {
        self.lock().get(name).cloned()
    }

    /// Snapshot of the buckets in name order.
    pub fn buckets(&self) -> Vec<Arc<TaskQueue<T>>> {
        self.lock().values().cloned().collect()
    }

    pub fn bucket_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn progress_by_bucket(&self) -> BTreeMap<String, Progress> {
        self.lock()
            .iter()
            .map(|(name, q)| (name.clone(), q.progress()))
            .collect()
    }

    /// Aggregate progress over every bucket.
    pub fn progress(&self) -> Progress {
        let parts: Vec<Progress> = self.buckets().iter().map(|q| q.progress()).collect();
        Progress::merge(&parts)
    }

    pub fn take_success(&self) -> Vec<T> {
        self.buckets().iter().flat_map(|q| q.take_success()).collect()
    }
}
