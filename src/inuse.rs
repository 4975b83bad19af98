//! In-use detection.
//! A file is "in use" when some process holds an open handle to it. The open-file
//! set comes from scanning `/proc/<pid>/fd/*`; the scan is cached and refreshed
//! once it is older than the configured interval.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default refresh interval of the open-file scan.
pub const DEFAULT_INUSE_REFRESH: Duration = Duration::from_secs(10);

pub trait InUseChecker: Send + Sync {
    fn is_in_use(&self, path: &Path) -> bool;
}

/// Checker that never reports a file as open.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverInUse;

impl InUseChecker for NeverInUse {
    fn is_in_use(&self, _path: &Path) -> bool {
        false
    }
}

/// Checker backed by a fixed set of paths.
#[derive(Debug, Default, Clone)]
pub struct FixedInUse(pub HashSet<PathBuf>);

impl InUseChecker for FixedInUse {
    fn is_in_use(&self, path: &Path) -> bool {
        self.0.contains(path)
    }
}

struct Snapshot {
    taken: Instant,
    open: HashSet<PathBuf>,
}

/// `/proc` scanner with a cached open-file set.
pub struct ProcFdScanner {
    proc_root: PathBuf,
    refresh: Duration,
    snapshot: Mutex<Option<Snapshot>>,
}

impl ProcFdScanner {
    pub fn new(refresh: Duration) -> Self {
        Self::with_root("/proc", refresh)
    }

    /// Scan an alternate proc-like tree (`<root>/<pid>/fd/<n>` symlinks).
    pub fn with_root(proc_root: impl Into<PathBuf>, refresh: Duration) -> Self {
        Self {
            proc_root: proc_root.into(),
            refresh,
            snapshot: Mutex::new(None),
        }
    }

    /// Collect every path some process currently holds open.
    /// Processes that vanish or deny access mid-scan are skipped.
    fn scan(&self) -> HashSet<PathBuf> {
        let mut open = HashSet::new();
        let Ok(procs) = fs::read_dir(&self.proc_root) else {
            debug!(root = %self.proc_root.display(), "proc root unreadable; assuming nothing is open");
            return open;
        };
        for proc_entry in procs.flatten() {
            let is_pid = proc_entry
                .file_name()
                .to_str()
                .map(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
                .unwrap_or(false);
            if !is_pid {
                continue;
            }
            let Ok(fds) = fs::read_dir(proc_entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                if let Ok(target) = fs::read_link(fd.path())
                    && target.is_absolute()
                {
                    open.insert(target);
                }
            }
        }
        trace!(count = open.len(), "scanned open file handles");
        open
    }
}

impl Default for ProcFdScanner {
    fn default() -> Self {
        Self::new(DEFAULT_INUSE_REFRESH)
    }
}

impl InUseChecker for ProcFdScanner {
    fn is_in_use(&self, path: &Path) -> bool {
        let Ok(mut guard) = self.snapshot.lock() else {
            return false;
        };
        let stale = guard
            .as_ref()
            .map(|s| s.taken.elapsed() >= self.refresh)
            .unwrap_or(true);
        if stale {
            *guard = Some(Snapshot {
                taken: Instant::now(),
                open: self.scan(),
            });
        }
        guard.as_ref().map(|s| s.open.contains(path)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    #[test]
    fn fake_proc_tree_is_scanned() {
        let root = tempdir().unwrap();
        let data = tempdir().unwrap();
        let held = data.path().join("held.bin");
        let idle = data.path().join("idle.bin");
        fs::write(&held, b"x").unwrap();
        fs::write(&idle, b"y").unwrap();

        let fd_dir = root.path().join("4242").join("fd");
        fs::create_dir_all(&fd_dir).unwrap();
        symlink(&held, fd_dir.join("3")).unwrap();
        // Non-pid entries are ignored.
        fs::create_dir_all(root.path().join("self").join("fd")).unwrap();
        symlink(&idle, root.path().join("self").join("fd").join("3")).unwrap();

        let scanner = ProcFdScanner::with_root(root.path(), Duration::from_secs(60));
        assert!(scanner.is_in_use(&held));
        assert!(!scanner.is_in_use(&idle));
    }

    #[test]
    fn snapshot_is_cached_until_refresh() {
        let root = tempdir().unwrap();
        let data = tempdir().unwrap();
        let file = data.path().join("late.bin");
        fs::write(&file, b"x").unwrap();

        let scanner = ProcFdScanner::with_root(root.path(), Duration::from_secs(3600));
        assert!(!scanner.is_in_use(&file));

        let fd_dir = root.path().join("7").join("fd");
        fs::create_dir_all(&fd_dir).unwrap();
        symlink(&file, fd_dir.join("9")).unwrap();
        assert!(!scanner.is_in_use(&file), "stale snapshot should still be used");

        let fresh = ProcFdScanner::with_root(root.path(), Duration::ZERO);
        assert!(fresh.is_in_use(&file));
    }

    #[test]
    fn own_open_file_is_detected_on_linux() {
        if !Path::new("/proc/self/fd").exists() {
            return;
        }
        let dir = tempdir().unwrap();
        let path = dunce::canonicalize(dir.path()).unwrap().join("open.txt");
        let _handle = fs::File::create(&path).unwrap();
        let scanner = ProcFdScanner::new(Duration::ZERO);
        assert!(scanner.is_in_use(&path));
    }
}
