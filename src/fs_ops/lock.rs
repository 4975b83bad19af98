//! Single-instance run lock.
//! Holds an exclusive `flock` on `<state_dir>/tier_move.lock` for the whole run so
//! two migrations never touch the same disks at once.
//!
//! Notes:
//! - The lock is released when the `RunLock` guard is dropped (fd close releases flock).
//! - The lock file records the holder's pid for diagnostics only; the flock is authoritative.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::helpers::io_error_with_help_io;

pub const LOCK_FILE_NAME: &str = "tier_move.lock";

/// RAII guard held while the run lock is active.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // The file stays in place: unlinking it would let a waiter lock a stale inode.
        let _ = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        trace!(path = %self.path.display(), "run lock released");
    }
}

pub fn lock_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LOCK_FILE_NAME)
}

/// Non-blocking attempt to take the run lock.
/// Returns Ok(None) if another process holds it.
pub fn try_acquire_run_lock(state_dir: &Path) -> io::Result<Option<RunLock>> {
    std::fs::create_dir_all(state_dir).map_err(io_error_with_help_io("create state dir", state_dir))?;
    let path = lock_file_path(state_dir);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .custom_flags(libc::O_CLOEXEC | libc::O_NOFOLLOW)
        .mode(0o600)
        .open(&path)?;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if let Some(code) = err.raw_os_error()
            && code == libc::EWOULDBLOCK
        {
            debug!(path = %path.display(), "run lock held by another process");
            return Ok(None);
        }
        return Err(err);
    }

    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    trace!(path = %path.display(), "run lock acquired");
    Ok(Some(RunLock { file, path }))
}
