//! Unix implementations of platform helpers.

use anyhow::{Context, Result};
use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::process::{Command, Stdio};

use super::temp::tmp_config_sibling_name;

/// Append handle for a log file. The final component must not be a symlink.
/// New files are created 0600; an existing file keeps the mode an admin gave it.
pub fn open_private_append(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC)
        .open(path)
}

/// Replace `path` with `contents` via a 0600 sibling, fsync, rename and
/// parent-directory fsync. Readers see the old file or the new one.
pub fn write_private_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = tmp_config_sibling_name(path);

    let staged = (|| -> io::Result<()> {
        let mut f = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&tmp)?;
        f.write_all(contents)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(e) = staged {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("write '{}' via '{}'", path.display(), tmp.display()));
    }

    File::open(parent)
        .and_then(|d| d.sync_all())
        .with_context(|| format!("fsync dir '{}'", parent.display()))
}

/// chmod to `mode` (permission bits only).
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

/// `(total, available)` bytes of the filesystem holding `path`. Available is
/// what an unprivileged writer may still use (`f_bavail`).
pub fn disk_usage(path: &Path) -> io::Result<(u64, u64)> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;
    // SAFETY: an all-zero statvfs is a valid value; the kernel overwrites it on success.
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and st is a live, writable statvfs.
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let block = st.f_frsize as u64;
    Ok((
        (st.f_blocks as u64).saturating_mul(block),
        (st.f_bavail as u64).saturating_mul(block),
    ))
}

/// Best-effort `chattr +C`. Only effective on empty files and on directories
/// (new children inherit the flag) of copy-on-write filesystems.
pub fn mark_nocow(path: &Path) -> io::Result<()> {
    let status = Command::new("chattr")
        .arg("+C")
        .arg(path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("chattr +C exited with {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn mode_of(p: &Path) -> u32 {
        fs::metadata(p).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn append_creates_private_and_keeps_admin_mode() {
        let dir = tempdir().unwrap();
        let fresh = dir.path().join("new.log");
        drop(open_private_append(&fresh).unwrap());
        assert_eq!(mode_of(&fresh), 0o600);

        let shipped = dir.path().join("shipped.log");
        fs::write(&shipped, b"old\n").unwrap();
        set_mode(&shipped, 0o640).unwrap();
        let mut f = open_private_append(&shipped).unwrap();
        f.write_all(b"new\n").unwrap();
        assert_eq!(mode_of(&shipped), 0o640);
        assert_eq!(fs::read(&shipped).unwrap(), b"old\nnew\n");
    }

    #[test]
    fn append_refuses_symlinked_file() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real.log");
        fs::write(&real, b"").unwrap();
        let link = dir.path().join("link.log");
        symlink(&real, &link).unwrap();
        assert!(open_private_append(&link).is_err());
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let cfg = dir.path().join("config.xml");
        write_private_atomic(&cfg, b"<a/>").unwrap();
        write_private_atomic(&cfg, b"<b/>").unwrap();
        assert_eq!(fs::read(&cfg).unwrap(), b"<b/>");
        assert_eq!(mode_of(&cfg), 0o600);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn disk_usage_reports_filesystem_and_rejects_missing() {
        let dir = tempdir().unwrap();
        let (total, free) = disk_usage(dir.path()).unwrap();
        assert!(total > 0 && free <= total);
        assert!(disk_usage(&dir.path().join("nope")).is_err());
    }
}
