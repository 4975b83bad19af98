//! Disk-usage provider.
//! `GetDiskUsage` answers come from statvfs and are cached per path for a short
//! interval so a burst of allocation decisions does not hammer the filesystems.
//! Space committed during the current run is tracked by the allocator's ledger,
//! not here.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::platform;
use crate::storage::Storage;

/// Default refresh interval for cached usage probes.
pub const DEFAULT_USAGE_REFRESH: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub total_size: u64,
    pub free_space: u64,
}

pub trait DiskUsageProvider: Send + Sync {
    fn disk_usage(&self, path: &Path) -> io::Result<DiskUsage>;

    /// Whether `storage` can take `file_size` more bytes and still keep `min_free` free.
    fn has_enough_free_space(&self, storage: &Storage, min_free: u64, file_size: u64) -> bool {
        match self.disk_usage(storage.fs_path()) {
            Ok(u) => u.free_space >= min_free.saturating_add(file_size),
            Err(_) => false,
        }
    }
}

/// statvfs-backed provider with a per-path cache.
pub struct StatvfsUsage {
    refresh: Duration,
    cache: Mutex<HashMap<PathBuf, (Instant, DiskUsage)>>,
}

impl StatvfsUsage {
    pub fn new(refresh: Duration) -> Self {
        Self {
            refresh,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for StatvfsUsage {
    fn default() -> Self {
        Self::new(DEFAULT_USAGE_REFRESH)
    }
}

impl DiskUsageProvider for StatvfsUsage {
    fn disk_usage(&self, path: &Path) -> io::Result<DiskUsage> {
        if let Ok(cache) = self.cache.lock()
            && let Some((at, usage)) = cache.get(path)
            && at.elapsed() < self.refresh
        {
            return Ok(*usage);
        }

        let (total_size, free_space) = platform::disk_usage(path)?;
        let usage = DiskUsage { total_size, free_space };
        trace!(path = %path.display(), total_size, free_space, "probed disk usage");
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(path.to_path_buf(), (Instant::now(), usage));
        }
        Ok(usage)
    }
}

/// Fixed answers keyed by mount path. Handy for dry planning and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticUsage {
    entries: HashMap<PathBuf, DiskUsage>,
}

impl StaticUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<PathBuf>, total_size: u64, free_space: u64) -> Self {
        self.entries.insert(path.into(), DiskUsage { total_size, free_space });
        self
    }
}

impl DiskUsageProvider for StaticUsage {
    fn disk_usage(&self, path: &Path) -> io::Result<DiskUsage> {
        self.entries.get(path).copied().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no usage recorded for {}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn statvfs_usage_caches_probe() {
        let dir = tempdir().unwrap();
        let usage = StatvfsUsage::new(Duration::from_secs(60));
        let first = usage.disk_usage(dir.path()).unwrap();
        let second = usage.disk_usage(dir.path()).unwrap();
        assert_eq!(first, second, "cached answer should be returned within refresh window");
        assert!(usage.cache.lock().unwrap().contains_key(dir.path()));
    }

    #[test]
    fn enough_space_respects_floor() {
        let usage = StaticUsage::new().with("/mnt/disk1", 100, 30);
        let disk = Storage::disk("disk1", "/mnt/disk1");
        assert!(usage.has_enough_free_space(&disk, 10, 20));
        assert!(!usage.has_enough_free_space(&disk, 11, 20));
        let unknown = Storage::disk("disk9", "/mnt/disk9");
        assert!(!usage.has_enough_free_space(&unknown, 0, 0));
    }
}
