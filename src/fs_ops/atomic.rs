//! Atomic no-clobber publish of a finished temp file.
//! - Links the temp file to the final name (fails with EEXIST if anything is there),
//!   then unlinks the temp name.
//! - Filesystems without hardlinks fall back to check-then-rename.
//! - Best-effort fsync of the destination directory afterwards.

use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

use super::helpers::io_error;
use super::util::{exists_no_follow, fsync_dir};
use crate::errors::TierMoveError;

pub fn rename_no_clobber(tmp: &Path, dst: &Path) -> Result<(), TierMoveError> {
    match fs::hard_link(tmp, dst) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(tmp) {
                let _ = fs::remove_file(dst);
                return Err(io_error("remove temporary name", tmp)(e));
            }
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(TierMoveError::DestinationExists(dst.to_path_buf()));
        }
        Err(e) => {
            debug!(dst = %dst.display(), error = %e, "hardlink publish unavailable; renaming");
            if exists_no_follow(dst) {
                return Err(TierMoveError::DestinationExists(dst.to_path_buf()));
            }
            fs::rename(tmp, dst).map_err(io_error("rename temporary file into place", dst))?;
        }
    }

    if let Some(parent) = dst.parent()
        && let Err(e) = fsync_dir(parent)
    {
        // A successful rename stays a success.
        debug!(dir = %parent.display(), error = %e, "directory fsync failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn renames_into_free_name() {
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("t");
        let dst = dir.path().join("d");
        fs::write(&tmp, b"x").unwrap();
        rename_no_clobber(&tmp, &dst).unwrap();
        assert!(!tmp.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"x");
    }

    #[test]
    fn never_replaces_existing() {
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("t");
        let dst = dir.path().join("d");
        fs::write(&tmp, b"new").unwrap();
        fs::write(&dst, b"old").unwrap();
        assert!(matches!(rename_no_clobber(&tmp, &dst), Err(TierMoveError::DestinationExists(_))));
        assert_eq!(fs::read(&dst).unwrap(), b"old");
        assert!(tmp.exists());
    }
}
