use std::fs::{self, File};
use std::io;
use std::path::Path;

/// fsync a directory so renames and creations inside it are durable.
pub(crate) fn fsync_dir(dir: &Path) -> io::Result<()> {
    let f = File::open(dir)?;
    f.sync_all()
}

/// Whether anything (including a dangling symlink) exists at `path`.
pub(crate) fn exists_no_follow(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Whether `path` is a directory with no entries.
pub fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).map(|mut it| it.next().is_none()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    #[test]
    fn dangling_symlink_counts_as_existing() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("l");
        symlink("nowhere", &link).unwrap();
        assert!(exists_no_follow(&link));
        assert!(!link.exists());
    }

    #[test]
    fn empty_dir_detection() {
        let dir = tempdir().unwrap();
        assert!(is_empty_dir(dir.path()));
        fs::write(dir.path().join("f"), b"").unwrap();
        assert!(!is_empty_dir(dir.path()));
        assert!(!is_empty_dir(&dir.path().join("missing")));
        fsync_dir(dir.path()).unwrap();
    }
}
