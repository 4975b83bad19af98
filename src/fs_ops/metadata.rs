//! Metadata restoration from the snapshot captured during the walk.
//! - Real files and directories get owner, mode and atime/mtime.
//! - Links get owner and times only; link permission bits carry no meaning.
//! - Best-effort: failures are logged and the item still counts as moved.

use filetime::{set_file_times, set_symlink_file_times};
use std::fs;
use std::os::unix::fs::{PermissionsExt, chown, lchown};
use std::path::Path;
use tracing::{trace, warn};

use crate::moveable::Metadata;

/// Owner and mode only, used right after creating a directory.
pub fn apply_owner_and_mode(dest: &Path, meta: &Metadata) {
    if let Err(e) = chown(dest, Some(meta.uid), Some(meta.gid)) {
        warn!(path = %dest.display(), uid = meta.uid, gid = meta.gid, error = %e, "failed to set owner on destination");
    }
    if let Err(e) = fs::set_permissions(dest, fs::Permissions::from_mode(meta.mode)) {
        warn!(path = %dest.display(), mode = format!("{:o}", meta.mode), error = %e, "failed to set permissions on destination");
    } else {
        trace!(path = %dest.display(), mode = format!("{:o}", meta.mode), "set permissions on destination");
    }
}

/// Apply timestamps from the snapshot; symlinks are not followed.
pub fn apply_times(dest: &Path, meta: &Metadata) {
    let res = if meta.is_symlink {
        set_symlink_file_times(dest, meta.atime, meta.mtime)
    } else {
        set_file_times(dest, meta.atime, meta.mtime)
    };
    match res {
        Ok(()) => trace!(path = %dest.display(), "set atime/mtime on destination"),
        Err(e) => warn!(path = %dest.display(), error = %e, "failed to set atime/mtime on destination"),
    }
}

/// Restore everything the snapshot records.
pub fn restore_metadata(dest: &Path, meta: &Metadata) {
    if meta.is_symlink {
        if let Err(e) = lchown(dest, Some(meta.uid), Some(meta.gid)) {
            warn!(path = %dest.display(), uid = meta.uid, gid = meta.gid, error = %e, "failed to set owner on link");
        }
    } else {
        apply_owner_and_mode(dest, meta);
    }
    apply_times(dest, meta);
}

/// Preserve extended attributes (xattrs) from source path to destination path.
/// Requires the "xattrs" feature (otherwise this is a no-op). Best-effort.
pub fn preserve_xattrs(src: &Path, dest: &Path) {
    #[cfg(feature = "xattrs")]
    {
        match xattr::list(src) {
            Ok(names) => {
                for name in names {
                    let name_disp = name.to_string_lossy();
                    match xattr::get(src, &name) {
                        Ok(value) => {
                            let value = value.unwrap_or_default();
                            if let Err(e) = xattr::set(dest, &name, &value) {
                                warn!(src = %src.display(), dest = %dest.display(), xattr = %name_disp, error = %e, "failed to set xattr on destination");
                            } else {
                                trace!(dest = %dest.display(), xattr = %name_disp, size = value.len(), "preserved xattr");
                            }
                        }
                        Err(e) => {
                            warn!(src = %src.display(), xattr = %name_disp, error = %e, "failed to read xattr value from source");
                        }
                    }
                }
            }
            Err(e) => warn!(src = %src.display(), error = %e, "failed to list xattrs; continuing"),
        }
    }
    #[cfg(not(feature = "xattrs"))]
    {
        let _ = (src, dest);
    }
}
