//! I/O helper utilities.
//!
//! Provides small adapters to enrich io::Error with actionable context/hints,
//! usable with map_err in TierMoveError, anyhow::Result and io::Result code paths.
//!
//! Usage:
//!   // engine code returning Result<_, TierMoveError>
//!   fs::create_dir(dir).map_err(io_error("create directory", dir))?;
//!
//!   // in functions returning anyhow::Result<_>
//!   fs::create_dir_all(dir).map_err(io_error_with_help("create dir", dir))?;
//!
//!   // in functions returning io::Result<_>
//!   File::open(p).map_err(io_error_with_help_io("open file", p))?;

use anyhow::anyhow;
use std::io;
use std::path::Path;

use crate::errors::TierMoveError;

/// Format a human-friendly message with op/path plus errno hints.
pub(crate) fn build_message(op: &str, path: &Path, e: &io::Error) -> String {
    let mut msg = format!("{} '{}': {}", op, path.display(), e);

    if let Some(code) = e.raw_os_error() {
        let hint = match code {
            libc::EACCES | libc::EPERM => Some("permission denied; check ownership and write permissions."),
            libc::EXDEV => Some("cross-filesystem; atomic rename not possible."),
            libc::EBUSY => Some("resource busy; ensure no other process is writing."),
            libc::ENOENT => Some("path not found; verify it exists."),
            libc::EEXIST => Some("already exists; the destination was created by someone else."),
            libc::ENOSPC => Some("insufficient space on device."),
            libc::EDQUOT => Some("disk quota exceeded."),
            libc::EROFS => Some("read-only filesystem; cannot write here."),
            libc::ELOOP => Some("too many symbolic link levels (ELOOP); possible symlink cycle."),
            libc::ENAMETOOLONG => Some("filename or path too long; shorten path segments."),
            libc::EMFILE => Some("process file descriptor limit reached; close files or raise limits."),
            libc::ENFILE => Some("system-wide file table overflow; reduce open files."),
            libc::EIO => Some("low-level I/O error; check the disk and its cabling."),
            _ => None,
        };
        if let Some(hint) = hint {
            msg.push_str(" (");
            msg.push_str(hint);
            msg.push(')');
        }
        msg.push_str(&format!(" [os code: {}]", code));
    } else {
        let hint = match e.kind() {
            io::ErrorKind::PermissionDenied => Some("permission denied; check ownership and write permissions."),
            io::ErrorKind::NotFound => Some("path not found; verify it exists."),
            io::ErrorKind::AlreadyExists => Some("already exists; remove or choose a unique name."),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                Some("busy/timed out; retry after the current write finishes.")
            }
            _ => None,
        };
        if let Some(hint) = hint {
            msg.push_str(" (");
            msg.push_str(hint);
            msg.push(')');
        }
    }

    msg
}

/// Adapter for engine code: io::Error -> TierMoveError::Io with the original as source.
pub fn io_error<'a>(op: &'a str, path: &'a Path) -> impl FnOnce(io::Error) -> TierMoveError + 'a {
    move |e: io::Error| TierMoveError::Io {
        message: build_message(op, path, &e),
        path: path.to_path_buf(),
        source: e,
    }
}

/// Adapter for anyhow::Result code.
pub fn io_error_with_help<'a>(op: &'a str, path: &'a Path) -> impl FnOnce(io::Error) -> anyhow::Error + 'a {
    move |e: io::Error| anyhow!(build_message(op, path, &e))
}

/// Adapter for io::Result code: enriched message, original ErrorKind preserved.
pub fn io_error_with_help_io<'a>(op: &'a str, path: &'a Path) -> impl FnOnce(io::Error) -> io::Error + 'a {
    move |e: io::Error| io::Error::new(e.kind(), build_message(op, path, &e))
}
