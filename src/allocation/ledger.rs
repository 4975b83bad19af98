//! In-run allocation ledger.
//!
//! Free-space probes lag behind the decisions of the current run, so every
//! placement is recorded here: bytes committed per disk, and which disks a
//! directory prefix has been placed on (`<share>/<a>/<b>` -> disks).

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone)]
pub struct Ledger {
    committed: HashMap<String, u64>,
    affinity: HashMap<PathBuf, BTreeSet<String>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes reserved on `disk` so far in this run.
    pub fn committed(&self, disk: &str) -> u64 {
        self.committed.get(disk).copied().unwrap_or(0)
    }

    pub fn commit(&mut self, disk: &str, bytes: u64) {
        let slot = self.committed.entry(disk.to_string()).or_insert(0);
        *slot = slot.saturating_add(bytes);
    }

    pub fn record_affinity(&mut self, prefix: impl Into<PathBuf>, disk: &str) {
        self.affinity.entry(prefix.into()).or_default().insert(disk.to_string());
    }

    /// Whether this run already placed something under `prefix` on `disk`.
    pub fn has_affinity(&self, prefix: &Path, disk: &str) -> bool {
        self.affinity.get(prefix).is_some_and(|d| d.contains(disk))
    }

    pub fn disks_for(&self, prefix: &Path) -> impl Iterator<Item = &str> {
        self.affinity.get(prefix).into_iter().flatten().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commits_accumulate_per_disk() {
        let mut l = Ledger::new();
        l.commit("disk1", 10);
        l.commit("disk1", 5);
        l.commit("disk2", 1);
        assert_eq!(l.committed("disk1"), 15);
        assert_eq!(l.committed("disk2"), 1);
        assert_eq!(l.committed("disk3"), 0);
    }

    #[test]
    fn affinity_is_tracked_per_prefix() {
        let mut l = Ledger::new();
        l.record_affinity("media/a", "disk2");
        l.record_affinity("media/a", "disk1");
        assert!(l.has_affinity(Path::new("media/a"), "disk2"));
        assert!(!l.has_affinity(Path::new("media/a/b"), "disk2"));
        let disks: Vec<_> = l.disks_for(Path::new("media/a")).collect();
        assert_eq!(disks, vec!["disk1", "disk2"]);
    }
}
