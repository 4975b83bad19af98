//! Split-level affinity.
//!
//! Items whose parent directory sits deeper than the share's split level stay
//! with their siblings: the deepest prefix of the parent that already exists on
//! some candidate disk (on disk, or placed there earlier in this run) limits the
//! candidates to those disks. Levels are tried from the full parent depth down to
//! the split level (never below 1).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::ledger::Ledger;
use super::strategy::Candidate;
use crate::storage::Share;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitMatch {
    pub level: usize,
    pub disks: BTreeSet<String>,
}

/// Prefix of `rel_parent` made of its first `level` components.
fn prefix(rel_parent: &Path, level: usize) -> PathBuf {
    rel_parent.components().take(level).collect()
}

/// Deepest matching level for one share-relative parent directory.
pub fn deepest_match(
    share: &Share,
    split_level: usize,
    rel_parent: &Path,
    candidates: &[Candidate],
    ledger: &Ledger,
    size: u64,
    floor: u64,
) -> Option<SplitMatch> {
    let depth = rel_parent.components().count();
    if depth <= split_level {
        return None;
    }
    for level in (split_level.max(1)..=depth).rev() {
        let prefix = prefix(rel_parent, level);
        let key = Path::new(share.name()).join(&prefix);
        let disks: BTreeSet<String> = candidates
            .iter()
            .filter(|c| c.has_room(size, floor))
            .filter(|c| c.disk.share_root(share).join(&prefix).is_dir() || ledger.has_affinity(&key, c.disk.name()))
            .map(|c| c.disk.name().to_string())
            .collect();
        if !disks.is_empty() {
            return Some(SplitMatch { level, disks });
        }
    }
    None
}

/// Reconcile several parents of one logical item (primary and its hardlinks):
/// the deepest level found across all of them wins, the first one on ties.
pub fn reconcile<'a>(
    share: &Share,
    split_level: usize,
    rel_parents: impl IntoIterator<Item = &'a Path>,
    candidates: &[Candidate],
    ledger: &Ledger,
    size: u64,
    floor: u64,
) -> Option<SplitMatch> {
    let mut best: Option<SplitMatch> = None;
    for parent in rel_parents {
        if let Some(found) = deepest_match(share, split_level, parent, candidates, ledger, size, floor)
            && best.as_ref().is_none_or(|b| found.level > b.level)
        {
            best = Some(found);
        }
    }
    best
}

/// Ancestor prefixes of a share-relative parent, shallowest first, keyed by share.
pub fn affinity_keys(share: &Share, rel_parent: &Path) -> Vec<PathBuf> {
    let depth = rel_parent.components().count();
    (1..=depth)
        .map(|level| Path::new(share.name()).join(prefix(rel_parent, level)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn candidates(root: &Path) -> Vec<Candidate> {
        (1..=3)
            .map(|i| {
                let path = root.join(format!("disk{i}"));
                fs::create_dir_all(&path).unwrap();
                Candidate {
                    disk: Arc::new(Storage::disk(format!("disk{i}"), path)),
                    total: 1000,
                    free: 500,
                }
            })
            .collect()
    }

    #[test]
    fn deepest_existing_prefix_wins() {
        let tmp = tempdir().unwrap();
        let c = candidates(tmp.path());
        fs::create_dir_all(tmp.path().join("disk2/media/a/b")).unwrap();
        fs::create_dir_all(tmp.path().join("disk3/media/a")).unwrap();
        let share = Share::new("media");

        let m = deepest_match(&share, 1, Path::new("a/b/c"), &c, &Ledger::new(), 1, 0).unwrap();
        assert_eq!(m.level, 2);
        assert_eq!(m.disks.into_iter().collect::<Vec<_>>(), vec!["disk2"]);
    }

    #[test]
    fn shallow_paths_are_not_restricted() {
        let tmp = tempdir().unwrap();
        let c = candidates(tmp.path());
        fs::create_dir_all(tmp.path().join("disk2/media/a")).unwrap();
        let share = Share::new("media");
        assert_eq!(deepest_match(&share, 1, Path::new("a"), &c, &Ledger::new(), 1, 0), None);
        assert_eq!(deepest_match(&share, 1, Path::new(""), &c, &Ledger::new(), 1, 0), None);
    }

    #[test]
    fn ledger_affinity_counts_as_existing() {
        let tmp = tempdir().unwrap();
        let c = candidates(tmp.path());
        let share = Share::new("media");
        let mut ledger = Ledger::new();
        ledger.record_affinity("media/x/y", "disk3");
        let m = deepest_match(&share, 0, Path::new("x/y"), &c, &ledger, 1, 0).unwrap();
        assert_eq!(m.level, 2);
        assert!(m.disks.contains("disk3"));
    }

    #[test]
    fn disks_without_room_do_not_match() {
        let tmp = tempdir().unwrap();
        let mut c = candidates(tmp.path());
        fs::create_dir_all(tmp.path().join("disk1/media/a/b")).unwrap();
        c[0].free = 10;
        let share = Share::new("media");
        assert_eq!(deepest_match(&share, 1, Path::new("a/b"), &c, &Ledger::new(), 20, 0), None);
    }

    #[test]
    fn hardlink_parents_take_deepest_level() {
        let tmp = tempdir().unwrap();
        let c = candidates(tmp.path());
        fs::create_dir_all(tmp.path().join("disk1/media/a")).unwrap();
        fs::create_dir_all(tmp.path().join("disk2/media/z/y/x")).unwrap();
        let share = Share::new("media");
        let parents = [Path::new("a/b"), Path::new("z/y/x")];
        let m = reconcile(&share, 0, parents, &c, &Ledger::new(), 1, 0).unwrap();
        assert_eq!(m.level, 3);
        assert!(m.disks.contains("disk2"));
    }

    #[test]
    fn affinity_keys_cover_every_ancestor() {
        let share = Share::new("media");
        assert_eq!(
            affinity_keys(&share, Path::new("a/b")),
            vec![PathBuf::from("media/a"), PathBuf::from("media/a/b")]
        );
    }
}
