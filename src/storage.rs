//! Read-only storage and share model.
//!
//! A `Storage` is either an array `Disk` (one of many allocation candidates) or a
//! `Pool` (a single fixed cache tier). A `Share` carries the per-share policy the
//! pipeline consults. `Inventory` is the provider handed to the core; nothing in
//! the engine mutates it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::errors::TierMoveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Disk,
    Pool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Storage {
    name: String,
    fs_path: PathBuf,
    kind: StorageKind,
}

impl Storage {
    pub fn disk(name: impl Into<String>, fs_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            fs_path: fs_path.into(),
            kind: StorageKind::Disk,
        }
    }

    pub fn pool(name: impl Into<String>, fs_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            fs_path: fs_path.into(),
            kind: StorageKind::Pool,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mount path of the volume.
    pub fn fs_path(&self) -> &Path {
        &self.fs_path
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn is_disk(&self) -> bool {
        self.kind == StorageKind::Disk
    }

    pub fn is_pool(&self) -> bool {
        self.kind == StorageKind::Pool
    }

    /// `<mount>/<share>` on this volume.
    pub fn share_root(&self, share: &Share) -> PathBuf {
        self.fs_path.join(share.name())
    }
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Cache participation of a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UseCache {
    /// Never written to a pool; nothing to move.
    #[default]
    No,
    /// New files land on the pool and are moved off it.
    Yes,
    /// Files are gathered onto the pool.
    Prefer,
    /// Files live on the pool only; nothing to move.
    Only,
}

impl FromStr for UseCache {
    type Err = TierMoveError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "no" | "" => Ok(UseCache::No),
            "yes" => Ok(UseCache::Yes),
            "prefer" => Ok(UseCache::Prefer),
            "only" => Ok(UseCache::Only),
            other => Err(TierMoveError::Config(format!(
                "invalid use_cache value '{other}' (expected yes|no|prefer|only)"
            ))),
        }
    }
}

/// Space placement strategy for array-bound items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorKind {
    HighWater,
    MostFree,
    FillUp,
}

impl AllocatorKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "highwater" | "high-water" | "high_water" => Some(AllocatorKind::HighWater),
            "mostfree" | "most-free" | "most_free" => Some(AllocatorKind::MostFree),
            "fillup" | "fill-up" | "fill_up" => Some(AllocatorKind::FillUp),
            _ => None,
        }
    }
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AllocatorKind::HighWater => "highwater",
            AllocatorKind::MostFree => "mostfree",
            AllocatorKind::FillUp => "fillup",
        })
    }
}

/// Which way a share's contents travel in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveDirection {
    /// Pool -> array disks (allocation required).
    PoolToArray { pool: String },
    /// Every included array disk -> pool.
    ArrayToPool { pool: String },
    /// Pool -> pool (cache -> cache2 and back); destination is fixed.
    PoolToPool { from: String, to: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub name: String,
    pub use_cache: UseCache,
    pub cache_pool: Option<String>,
    pub cache_pool2: Option<String>,
    /// Raw allocator name as configured; parsed when the share is evaluated.
    pub allocator: Option<String>,
    /// Negative disables split-level placement.
    pub split_level: i32,
    /// Minimum free bytes to leave on any destination.
    pub space_floor: u64,
    /// Empty means every array disk.
    pub include_disks: Vec<String>,
    pub exclude_disks: Vec<String>,
    /// Mark newly created files and directories NOCOW.
    pub disable_cow: bool,
}

impl Share {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            use_cache: UseCache::No,
            cache_pool: None,
            cache_pool2: None,
            allocator: None,
            split_level: -1,
            space_floor: 0,
            include_disks: Vec::new(),
            exclude_disks: Vec::new(),
            disable_cow: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parsed allocator; `NoAllocationMethod` when missing or unknown.
    pub fn allocator_kind(&self) -> Result<AllocatorKind, TierMoveError> {
        self.allocator
            .as_deref()
            .and_then(AllocatorKind::parse)
            .ok_or_else(|| TierMoveError::NoAllocationMethod {
                share: self.name.clone(),
                method: self.allocator.clone(),
            })
    }

    /// Split level when enabled.
    pub fn split_level(&self) -> Option<usize> {
        usize::try_from(self.split_level).ok()
    }

    /// Direction of travel for this share, `None` when nothing moves.
    pub fn direction(&self) -> Option<MoveDirection> {
        let pool = self.cache_pool.clone()?;
        match (self.use_cache, self.cache_pool2.clone()) {
            (UseCache::Yes, Some(to)) => Some(MoveDirection::PoolToPool { from: pool, to }),
            (UseCache::Yes, None) => Some(MoveDirection::PoolToArray { pool }),
            (UseCache::Prefer, Some(from)) => Some(MoveDirection::PoolToPool { from, to: pool }),
            (UseCache::Prefer, None) => Some(MoveDirection::ArrayToPool { pool }),
            (UseCache::No, _) | (UseCache::Only, _) => None,
        }
    }
}

/// Disks, pools and shares known to a run.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    disks: BTreeMap<String, Arc<Storage>>,
    pools: BTreeMap<String, Arc<Storage>>,
    shares: BTreeMap<String, Arc<Share>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_disk(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.add_storage(Storage::disk(name, path));
        self
    }

    pub fn with_pool(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.add_storage(Storage::pool(name, path));
        self
    }

    pub fn with_share(mut self, share: Share) -> Self {
        self.add_share(share);
        self
    }

    pub fn add_storage(&mut self, storage: Storage) {
        let name = storage.name().to_string();
        match storage.kind() {
            StorageKind::Disk => self.disks.insert(name, Arc::new(storage)),
            StorageKind::Pool => self.pools.insert(name, Arc::new(storage)),
        };
    }

    pub fn add_share(&mut self, share: Share) {
        self.shares.insert(share.name.clone(), Arc::new(share));
    }

    pub fn disk(&self, name: &str) -> Option<Arc<Storage>> {
        self.disks.get(name).cloned()
    }

    pub fn pool(&self, name: &str) -> Option<Arc<Storage>> {
        self.pools.get(name).cloned()
    }

    pub fn share(&self, name: &str) -> Option<Arc<Share>> {
        self.shares.get(name).cloned()
    }

    /// Look a storage up by name in either namespace.
    pub fn storage(&self, name: &str) -> Option<Arc<Storage>> {
        self.disk(name).or_else(|| self.pool(name))
    }

    pub fn disks(&self) -> impl Iterator<Item = &Arc<Storage>> {
        self.disks.values()
    }

    pub fn pools(&self) -> impl Iterator<Item = &Arc<Storage>> {
        self.pools.values()
    }

    pub fn shares(&self) -> impl Iterator<Item = &Arc<Share>> {
        self.shares.values()
    }

    /// Array disks a share may be placed on: included (all when empty) minus excluded.
    pub fn included_disks(&self, share: &Share) -> Vec<Arc<Storage>> {
        self.disks
            .values()
            .filter(|d| share.include_disks.is_empty() || share.include_disks.iter().any(|n| n == d.name()))
            .filter(|d| !share.exclude_disks.iter().any(|n| n == d.name()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory() -> Inventory {
        Inventory::new()
            .with_disk("disk1", "/mnt/disk1")
            .with_disk("disk2", "/mnt/disk2")
            .with_disk("disk3", "/mnt/disk3")
            .with_pool("cache", "/mnt/cache")
    }

    #[test]
    fn include_and_exclude_lists_combine() {
        let inv = inventory();
        let mut share = Share::new("media");
        assert_eq!(inv.included_disks(&share).len(), 3);

        share.include_disks = vec!["disk1".into(), "disk2".into()];
        share.exclude_disks = vec!["disk2".into()];
        let names: Vec<_> = inv.included_disks(&share).iter().map(|d| d.name().to_string()).collect();
        assert_eq!(names, vec!["disk1"]);
    }

    #[test]
    fn direction_follows_cache_policy() {
        let mut share = Share::new("s");
        share.cache_pool = Some("cache".into());
        assert_eq!(share.direction(), None);

        share.use_cache = UseCache::Yes;
        assert_eq!(share.direction(), Some(MoveDirection::PoolToArray { pool: "cache".into() }));

        share.use_cache = UseCache::Prefer;
        assert_eq!(share.direction(), Some(MoveDirection::ArrayToPool { pool: "cache".into() }));

        share.cache_pool2 = Some("fast".into());
        assert_eq!(
            share.direction(),
            Some(MoveDirection::PoolToPool { from: "fast".into(), to: "cache".into() })
        );

        share.use_cache = UseCache::Yes;
        assert_eq!(
            share.direction(),
            Some(MoveDirection::PoolToPool { from: "cache".into(), to: "fast".into() })
        );
    }

    #[test]
    fn allocator_names_parse_or_fail() {
        let mut share = Share::new("s");
        assert!(matches!(share.allocator_kind(), Err(TierMoveError::NoAllocationMethod { .. })));
        share.allocator = Some("High-Water".into());
        assert_eq!(share.allocator_kind().unwrap(), AllocatorKind::HighWater);
        share.allocator = Some("bogus".into());
        assert!(share.allocator_kind().is_err());
    }

    #[test]
    fn negative_split_level_disables() {
        let mut share = Share::new("s");
        assert_eq!(share.split_level(), None);
        share.split_level = 2;
        assert_eq!(share.split_level(), Some(2));
    }
}
