//! Queue drivers.
//!
//! Both drivers check the cancel token before every dequeue. An item already
//! handed to the processing function runs to completion; cancellation only stops
//! new work from being taken.

use rayon::ThreadPoolBuilder;
use std::io;
use std::path::PathBuf;
use tracing::{debug, trace};

use super::QueueItem;
use super::task_queue::TaskQueue;
use crate::errors::TierMoveError;
use crate::shutdown::CancelToken;

/// Outcome reported by a processing function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Success,
    Skipped,
    /// Put the item back at the end of the pending list.
    Requeue,
}

/// Process one item at a time until the queue is drained or the run is canceled.
pub fn process_sequential<T, F>(queue: &TaskQueue<T>, cancel: &CancelToken, mut f: F) -> Result<(), TierMoveError>
where
    T: QueueItem,
    F: FnMut(&mut T) -> Decision,
{
    loop {
        cancel.check()?;
        let Some(mut item) = queue.dequeue() else {
            trace!(queue = %queue.name(), "sequential driver drained");
            return Ok(());
        };
        let decision = f(&mut item);
        queue.complete(item, decision);
    }
}

/// Process items on a pool of `workers` threads (at least one), each pulling
/// from the queue until it is empty.
///
/// A worker stops as soon as nothing is pending, but a sibling still in flight
/// may requeue its item afterwards. Once every worker has returned the queue is
/// checked again and dispatch restarts if anything landed.
pub fn process_concurrent<T, F>(
    queue: &TaskQueue<T>,
    workers: usize,
    cancel: &CancelToken,
    f: F,
) -> Result<(), TierMoveError>
where
    T: QueueItem,
    F: Fn(&mut T) -> Decision + Sync,
{
    let workers = workers.max(1);
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name({
            let name = queue.name().to_string();
            move |i| format!("{name}-{i}")
        })
        .build()
        .map_err(|e| TierMoveError::Io {
            message: format!("start {workers} workers for queue {}: {e}", queue.name()),
            path: PathBuf::new(),
            source: io::Error::other(e),
        })?;

    let f = &f;
    loop {
        pool.scope(|s| {
            for _ in 0..workers {
                s.spawn(move |_| {
                    while !cancel.is_canceled() {
                        let Some(mut item) = queue.dequeue() else {
                            break;
                        };
                        let decision = f(&mut item);
                        queue.complete(item, decision);
                    }
                });
            }
        });
        cancel.check()?;
        if !queue.has_pending() {
            trace!(queue = %queue.name(), "concurrent driver drained");
            return Ok(());
        }
        debug!(queue = %queue.name(), "work was requeued after workers finished; dispatching again");
    }
}
