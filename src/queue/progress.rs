//! Progress snapshot of one queue or an aggregate of several.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Progress {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub success: usize,
    pub skipped: usize,
    /// Sum of item weights over all items.
    pub total_weight: u64,
    /// Sum of item weights over finished items.
    pub done_weight: u64,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
    /// Wall time since the first dequeue (until finish when finished).
    #[serde(with = "secs")]
    pub elapsed: Duration,
}

impl Progress {
    pub fn processed(&self) -> usize {
        self.success + self.skipped
    }

    pub fn is_finished(&self) -> bool {
        self.pending == 0 && self.in_progress == 0
    }

    /// Percentage of items in a terminal state. An empty queue is 100% done.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.processed() as f64 * 100.0 / self.total as f64
        }
    }

    /// Linear extrapolation from elapsed time and processed count.
    pub fn eta(&self) -> Option<Duration> {
        let processed = self.processed();
        if processed == 0 {
            return None;
        }
        let remaining = self.total.saturating_sub(processed);
        Some(self.elapsed.mul_f64(remaining as f64 / processed as f64))
    }

    /// Finished weight per second (items/s or bytes/s depending on the item type).
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.done_weight as f64 / secs } else { 0.0 }
    }

    /// Combine several snapshots; timestamps span the earliest start to the latest finish.
    pub fn merge<'a>(parts: impl IntoIterator<Item = &'a Progress>) -> Progress {
        let mut out = Progress::default();
        let mut all_finished = true;
        for p in parts {
            out.total += p.total;
            out.pending += p.pending;
            out.in_progress += p.in_progress;
            out.success += p.success;
            out.skipped += p.skipped;
            out.total_weight += p.total_weight;
            out.done_weight += p.done_weight;
            out.elapsed = out.elapsed.max(p.elapsed);
            out.started_at = match (out.started_at, p.started_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            match p.finished_at {
                Some(f) => out.finished_at = Some(out.finished_at.map_or(f, |cur| cur.max(f))),
                None if p.total > 0 => all_finished = false,
                None => {}
            }
        }
        if !all_finished {
            out.finished_at = None;
        }
        out
    }
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}
