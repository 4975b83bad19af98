//! Destination-disk allocation for array-bound moveables.
//!
//! One `Allocator` lives for one run. Its ledger is read and updated under a
//! single lock per decision, so concurrent evaluation workers never over-commit
//! a disk between two free-space probes.

pub mod ledger;
pub mod split_level;
pub mod strategy;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::errors::TierMoveError;
use crate::moveable::Moveable;
use crate::storage::{Inventory, Storage};
use crate::usage::DiskUsageProvider;
use ledger::Ledger;
use strategy::Candidate;

pub struct Allocator {
    inventory: Arc<Inventory>,
    usage: Arc<dyn DiskUsageProvider>,
    ledger: Mutex<Ledger>,
}

impl Allocator {
    pub fn new(inventory: Arc<Inventory>, usage: Arc<dyn DiskUsageProvider>) -> Self {
        Self {
            inventory,
            usage,
            ledger: Mutex::new(Ledger::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Copy of the ledger as it stands.
    pub fn ledger(&self) -> Ledger {
        self.lock().clone()
    }

    /// Pick a disk for `m`, set it on the moveable and its hardlinks, and allocate
    /// each symlink subordinate on its own. Symlinks that cannot be placed are
    /// dropped from the item. Returns false when the item itself must be skipped.
    pub fn allocate_array_destination(&self, m: &mut Moveable) -> bool {
        let disk = match self.allocate(m) {
            Ok(disk) => disk,
            Err(e) => {
                warn!(
                    share = %m.share.name(),
                    path = %m.source_path.display(),
                    code = e.code(),
                    kind = e.kind(),
                    error = %e,
                    "skipping: allocation failed"
                );
                return false;
            }
        };
        info!(
            share = %m.share.name(),
            path = %m.source_path.display(),
            disk = %disk,
            size = m.size(),
            "allocated"
        );
        for h in &mut m.hardlinks {
            h.dest = Some(disk.clone());
        }
        m.dest = Some(disk);

        let symlinks = std::mem::take(&mut m.symlinks);
        for mut sym in symlinks {
            match self.allocate(&sym) {
                Ok(d) => {
                    sym.dest = Some(d);
                    m.symlinks.push(sym);
                }
                Err(e) => warn!(
                    share = %sym.share.name(),
                    path = %sym.source_path.display(),
                    code = e.code(),
                    error = %e,
                    "dropping symlink: allocation failed"
                ),
            }
        }
        true
    }

    /// Choose a destination disk for `m` and record the commitment in the ledger.
    pub fn allocate(&self, m: &Moveable) -> Result<Arc<Storage>, TierMoveError> {
        let share = &m.share;
        let kind = share.allocator_kind()?;
        let size = m.size();
        let floor = share.space_floor;
        let disks = self.inventory.included_disks(share);
        if disks.is_empty() {
            return Err(not_allocatable(m));
        }

        let mut ledger = self.lock();
        let mut candidates: Vec<Candidate> = disks
            .into_iter()
            .filter_map(|disk| match self.usage.disk_usage(disk.fs_path()) {
                Ok(u) => Some(Candidate {
                    total: u.total_size,
                    free: u.free_space.saturating_sub(ledger.committed(disk.name())),
                    disk,
                }),
                Err(e) => {
                    debug!(disk = %disk, error = %e, "no usage for disk; not a candidate");
                    None
                }
            })
            .collect();
        if candidates.is_empty() {
            return Err(TierMoveError::NoDiskStats {
                share: share.name().to_string(),
            });
        }

        let parents = share_relative_parents(m);
        if let Some(level) = share.split_level()
            && let Some(found) = split_level::reconcile(
                share,
                level,
                parents.iter().map(PathBuf::as_path),
                &candidates,
                &ledger,
                size,
                floor,
            )
        {
            debug!(
                share = %share.name(),
                path = %m.source_path.display(),
                level = found.level,
                disks = ?found.disks,
                "split level restricts candidates"
            );
            candidates.retain(|c| found.disks.contains(c.disk.name()));
        }

        let chosen = strategy::choose(kind, &candidates, size, floor)
            .map(|c| c.disk.clone())
            .ok_or_else(|| not_allocatable(m))?;

        ledger.commit(chosen.name(), size);
        for parent in &parents {
            for key in split_level::affinity_keys(share, parent) {
                ledger.record_affinity(key, chosen.name());
            }
        }
        Ok(chosen)
    }
}

fn not_allocatable(m: &Moveable) -> TierMoveError {
    TierMoveError::NotAllocatable {
        share: m.share.name().to_string(),
        path: m.source_path.clone(),
        size: m.size(),
    }
}

/// Share-relative parent directories of the item and every hardlink.
fn share_relative_parents(m: &Moveable) -> Vec<PathBuf> {
    std::iter::once(m)
        .chain(m.hardlinks.iter())
        .filter_map(|x| x.share_relative_path().and_then(Path::parent).map(Path::to_path_buf))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moveable::test_support::moveable_at;
    use crate::moveable::{Link, SymTarget};
    use crate::storage::Share;
    use crate::usage::StaticUsage;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        tmp: TempDir,
        inventory: Arc<Inventory>,
        share: Arc<Share>,
        cache: Arc<Storage>,
    }

    fn fixture(allocator: &str, split_level: i32, floor: u64) -> Fixture {
        let tmp = tempdir().unwrap();
        let mut share = Share::new("media");
        share.allocator = Some(allocator.into());
        share.split_level = split_level;
        share.space_floor = floor;
        let mut inv = Inventory::new().with_pool("cache", tmp.path().join("cache"));
        for i in 1..=3 {
            let p = tmp.path().join(format!("disk{i}"));
            fs::create_dir_all(&p).unwrap();
            inv = inv.with_disk(&format!("disk{i}"), p);
        }
        fs::create_dir_all(tmp.path().join("cache/media")).unwrap();
        let inv = inv.with_share(share);
        Fixture {
            cache: inv.pool("cache").unwrap(),
            share: inv.share("media").unwrap(),
            inventory: Arc::new(inv),
            tmp,
        }
    }

    fn usage(f: &Fixture, free: [u64; 3]) -> Arc<StaticUsage> {
        let mut u = StaticUsage::new();
        for (i, free) in free.iter().enumerate() {
            u = u.with(f.tmp.path().join(format!("disk{}", i + 1)), 100, *free);
        }
        Arc::new(u)
    }

    fn file(f: &Fixture, rel: &str, len: usize) -> Moveable {
        let path = f.tmp.path().join("cache/media").join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, vec![7u8; len]).unwrap();
        moveable_at(&f.share, &f.cache, &path)
    }

    #[test]
    fn split_level_overrides_strategy() {
        let f = fixture("mostfree", 1, 0);
        fs::create_dir_all(f.tmp.path().join("disk2/media/a/b")).unwrap();
        let alloc = Allocator::new(f.inventory.clone(), usage(&f, [10, 20, 90]));
        let mut m = file(&f, "a/b/c/file", 4);
        assert!(alloc.allocate_array_destination(&mut m));
        assert_eq!(m.dest.as_ref().unwrap().name(), "disk2");
    }

    #[test]
    fn ledger_prevents_over_commit() {
        let f = fixture("mostfree", -1, 0);
        let alloc = Allocator::new(f.inventory.clone(), usage(&f, [10, 30, 40]));
        let mut first = file(&f, "one.bin", 25);
        let mut second = file(&f, "two.bin", 25);
        assert!(alloc.allocate_array_destination(&mut first));
        assert!(alloc.allocate_array_destination(&mut second));
        assert_eq!(first.dest.as_ref().unwrap().name(), "disk3");
        // disk3 has 15 left after the first commit; disk2 (30) now has the most.
        assert_eq!(second.dest.as_ref().unwrap().name(), "disk2");
        assert_eq!(alloc.ledger().committed("disk3"), 25);

        let mut third = file(&f, "three.bin", 25);
        assert!(!alloc.allocate_array_destination(&mut third));
        assert!(third.dest.is_none());
    }

    #[test]
    fn run_affinity_keeps_siblings_together() {
        let f = fixture("mostfree", 0, 0);
        let alloc = Allocator::new(f.inventory.clone(), usage(&f, [50, 60, 70]));
        let mut a = file(&f, "show/s1/e1.mkv", 30);
        let mut b = file(&f, "show/s1/e2.mkv", 30);
        assert!(alloc.allocate_array_destination(&mut a));
        assert!(alloc.allocate_array_destination(&mut b));
        assert_eq!(a.dest.as_ref().unwrap().name(), "disk3");
        // Strategy alone would pick disk2 (60 > 40 left on disk3).
        assert_eq!(b.dest.as_ref().unwrap().name(), "disk3");
    }

    #[test]
    fn unknown_allocator_skips_item() {
        let f = fixture("roundrobin", -1, 0);
        let alloc = Allocator::new(f.inventory.clone(), usage(&f, [10, 20, 30]));
        let m = file(&f, "x.bin", 1);
        assert!(matches!(alloc.allocate(&m), Err(TierMoveError::NoAllocationMethod { .. })));
    }

    #[test]
    fn missing_stats_are_reported() {
        let f = fixture("highwater", -1, 0);
        let alloc = Allocator::new(f.inventory.clone(), Arc::new(StaticUsage::new()));
        let m = file(&f, "x.bin", 1);
        assert!(matches!(alloc.allocate(&m), Err(TierMoveError::NoDiskStats { .. })));
    }

    #[test]
    fn hardlinks_inherit_and_symlinks_are_allocated() {
        let f = fixture("fillup", -1, 0);
        let alloc = Allocator::new(f.inventory.clone(), usage(&f, [5, 50, 90]));
        let mut m = file(&f, "primary.bin", 10);
        let link_path = f.tmp.path().join("cache/media/second.bin");
        fs::hard_link(&m.source_path, &link_path).unwrap();
        let mut h = moveable_at(&f.share, &f.cache, &link_path);
        h.link = Some(Link::Hard { primary: m.source_path.clone() });
        m.hardlinks.push(h);
        let sym_path = f.tmp.path().join("cache/media/alias");
        symlink("primary.bin", &sym_path).unwrap();
        let mut s = moveable_at(&f.share, &f.cache, &sym_path);
        s.link = Some(Link::Sym(SymTarget::Internal {
            target: m.source_path.clone(),
            target_dest: None,
        }));
        m.symlinks.push(s);

        assert!(alloc.allocate_array_destination(&mut m));
        assert_eq!(m.dest.as_ref().unwrap().name(), "disk2");
        assert_eq!(m.hardlinks[0].dest.as_ref().unwrap().name(), "disk2");
        assert_eq!(m.symlinks.len(), 1);
        assert!(m.symlinks[0].dest.is_some());
        assert_eq!(alloc.ledger().committed("disk2"), 10);
    }
}
