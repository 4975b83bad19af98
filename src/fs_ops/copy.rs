//! Verified copy-and-rename:
//! - Copies to a uniquely named `*.tier_move.partial` sibling of the destination
//! - Hashes source and written bytes while streaming (io_copy::copy_hashed fsyncs)
//! - Re-hashes the temp file from disk and compares before it is renamed
//! - Renames into place only if the destination name is still free
//!
//! A `TempCopy` owns its temp file: dropping it without a successful `finalize`
//! removes the file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

use super::atomic::rename_no_clobber;
use super::helpers::io_error;
use super::io_copy::{copy_hashed, hash_file};
use crate::errors::TierMoveError;
use crate::platform;
use crate::shutdown::{CancelToken, is_read_canceled};

#[derive(Debug)]
pub struct TempCopy {
    tmp: PathBuf,
    dest: PathBuf,
    bytes: u64,
    hash: blake3::Hash,
    armed: bool,
}

impl TempCopy {
    pub fn tmp_path(&self) -> &Path {
        &self.tmp
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Verify the temp file still matches the source and rename it into place.
    pub fn finalize(mut self) -> Result<u64, TierMoveError> {
        let on_disk = hash_file(&self.tmp).map_err(io_error("re-read temporary file", &self.tmp))?;
        if on_disk != self.hash {
            return Err(TierMoveError::HashMismatch {
                path: self.dest.clone(),
                expected: self.hash.to_hex().to_string(),
                actual: on_disk.to_hex().to_string(),
            });
        }
        rename_no_clobber(&self.tmp, &self.dest)?;
        self.armed = false;
        trace!(dest = %self.dest.display(), bytes = self.bytes, hash = %self.hash.to_hex(), "verified copy in place");
        Ok(self.bytes)
    }
}

impl Drop for TempCopy {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.tmp) {
            Ok(()) => trace!(path = %self.tmp.display(), "removed temporary file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.tmp.display(), error = %e, "failed to remove temporary file"),
        }
    }
}

/// Stream `src` into a fresh temp sibling of `dest`.
pub fn copy_to_temp(src: &Path, dest: &Path, cancel: &CancelToken, nocow: bool) -> Result<TempCopy, TierMoveError> {
    let tmp = platform::partial_sibling_name(dest);
    let res = match copy_hashed(src, &tmp, cancel, nocow) {
        Ok(res) => res,
        Err(e) => {
            if e.kind() != io::ErrorKind::AlreadyExists {
                let _ = fs::remove_file(&tmp);
            }
            if is_read_canceled(&e) {
                return Err(TierMoveError::Canceled);
            }
            return Err(io_error("copy to temporary file", &tmp)(e));
        }
    };
    let temp = TempCopy {
        tmp,
        dest: dest.to_path_buf(),
        bytes: res.bytes,
        hash: res.source_hash,
        armed: true,
    };
    if res.source_hash != res.written_hash {
        return Err(TierMoveError::HashMismatch {
            path: dest.to_path_buf(),
            expected: res.source_hash.to_hex().to_string(),
            actual: res.written_hash.to_hex().to_string(),
        });
    }
    Ok(temp)
}

/// Copy `src` to `dest` with hash verification; returns bytes copied.
pub fn verified_copy(src: &Path, dest: &Path, cancel: &CancelToken, nocow: bool) -> Result<u64, TierMoveError> {
    copy_to_temp(src, dest, cancel, nocow)?.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::tempdir;

    fn partials(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .flatten()
            .filter(|e| platform::is_partial_name(&e.file_name()))
            .count()
    }

    #[test]
    fn copies_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.bin");
        let dst = dir.path().join("b.bin");
        fs::write(&src, b"payload").unwrap();
        assert_eq!(verified_copy(&src, &dst, &CancelToken::new(), false).unwrap(), 7);
        assert_eq!(fs::read(&dst).unwrap(), b"payload");
        assert_eq!(partials(dir.path()), 0);
    }

    #[test]
    fn copies_names_up_to_name_max() {
        let dir = tempdir().unwrap();
        let name = "a".repeat(250);
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join(&name), b"long").unwrap();
        let dst = dir.path().join(&name);
        assert_eq!(verified_copy(&src.join(&name), &dst, &CancelToken::new(), false).unwrap(), 4);
        assert_eq!(fs::read(&dst).unwrap(), b"long");
        assert_eq!(partials(dir.path()), 0);
    }

    #[test]
    fn corrupted_temp_fails_with_hash_mismatch() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.bin");
        let dst = dir.path().join("b.bin");
        fs::write(&src, b"important bytes").unwrap();

        let temp = copy_to_temp(&src, &dst, &CancelToken::new(), false).unwrap();
        {
            let mut f = fs::OpenOptions::new().write(true).open(temp.tmp_path()).unwrap();
            f.seek(SeekFrom::Start(3)).unwrap();
            f.write_all(b"X").unwrap();
        }
        let err = temp.finalize().unwrap_err();
        assert!(matches!(err, TierMoveError::HashMismatch { .. }));
        assert!(!dst.exists());
        assert_eq!(partials(dir.path()), 0);
        assert_eq!(fs::read(&src).unwrap(), b"important bytes");
    }

    #[test]
    fn destination_appearing_late_is_not_replaced() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.bin");
        let dst = dir.path().join("b.bin");
        fs::write(&src, b"new").unwrap();
        let temp = copy_to_temp(&src, &dst, &CancelToken::new(), false).unwrap();
        fs::write(&dst, b"someone else").unwrap();
        assert!(matches!(temp.finalize(), Err(TierMoveError::DestinationExists(_))));
        assert_eq!(fs::read(&dst).unwrap(), b"someone else");
        assert_eq!(partials(dir.path()), 0);
    }

    #[test]
    fn canceled_copy_cleans_up() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.bin");
        fs::write(&src, b"abc").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let res = copy_to_temp(&src, &dir.path().join("b.bin"), &cancel, false);
        assert!(matches!(res, Err(TierMoveError::Canceled)));
        assert_eq!(partials(dir.path()), 0);
    }
}
