//! Moveable graph: the filesystem objects a run relocates.
//!
//! A top-level `Moveable` is a regular file, an empty directory or an external
//! symlink. Hardlinks to the same inode and symlinks pointing at it travel as its
//! subordinates. Each moveable carries the chain of non-empty ancestor directories
//! (share root first, immediate parent last) needed to rebuild the tree on the
//! destination and to prune emptied directories on the source.

use filetime::FileTime;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::queue::QueueItem;
use crate::storage::{Share, Storage};

/// Snapshot of an object's metadata, captured once during the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub inode: u64,
    pub dev: u64,
    pub nlink: u64,
    /// Permission bits (mode & 0o7777).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: FileTime,
    pub mtime: FileTime,
    pub size: u64,
    pub is_dir: bool,
    pub is_symlink: bool,
    /// Raw link target as stored on disk, for symlinks.
    pub symlink_target: Option<PathBuf>,
}

impl Metadata {
    /// lstat `path` (symlinks are not followed).
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let meta = fs::symlink_metadata(path)?;
        let is_symlink = meta.file_type().is_symlink();
        let symlink_target = if is_symlink { Some(fs::read_link(path)?) } else { None };
        Ok(Self {
            inode: meta.ino(),
            dev: meta.dev(),
            nlink: meta.nlink(),
            mode: meta.mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
            atime: FileTime::from_last_access_time(&meta),
            mtime: FileTime::from_last_modification_time(&meta),
            size: meta.size(),
            is_dir: meta.is_dir(),
            is_symlink,
            symlink_target,
        })
    }

    pub fn is_regular(&self) -> bool {
        !self.is_dir && !self.is_symlink
    }
}

/// A non-empty ancestor directory of a moveable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub source_path: PathBuf,
    pub dest_path: Option<PathBuf>,
    pub metadata: Metadata,
}

impl Directory {
    pub fn new(source_path: PathBuf, metadata: Metadata) -> Self {
        Self {
            source_path,
            dest_path: None,
            metadata,
        }
    }

    /// Number of path components, used to order pruning deepest-first.
    pub fn depth(&self) -> usize {
        self.source_path.components().count()
    }
}

/// Ancestor directories ordered shallowest (share root) to deepest (immediate parent).
/// Index iteration replaces parent/child pointers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirChain {
    dirs: Vec<Directory>,
}

impl DirChain {
    pub fn new(dirs: Vec<Directory>) -> Self {
        Self { dirs }
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn shallowest(&self) -> Option<&Directory> {
        self.dirs.first()
    }

    pub fn deepest(&self) -> Option<&Directory> {
        self.dirs.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Directory> {
        self.dirs.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Directory> {
        self.dirs.iter_mut()
    }
}

impl<'a> IntoIterator for &'a DirChain {
    type Item = &'a Directory;
    type IntoIter = std::slice::Iter<'a, Directory>;
    fn into_iter(self) -> Self::IntoIter {
        self.dirs.iter()
    }
}

/// Where a symlink points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymTarget {
    /// Target is another object of the same walk; recreated pointing at the
    /// target's destination path once that is known.
    Internal {
        target: PathBuf,
        target_dest: Option<PathBuf>,
    },
    /// Target lies outside the walk; recreated with the literal raw target.
    External { raw: PathBuf },
}

/// Link role of a moveable. Absent for regular files and empty directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    /// Secondary name of the primary's inode.
    Hard { primary: PathBuf },
    Sym(SymTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveableKind {
    File,
    EmptyDir,
    Hardlink,
    Symlink,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Moveable {
    pub share: Arc<Share>,
    pub source: Arc<Storage>,
    pub source_path: PathBuf,
    pub dest: Option<Arc<Storage>>,
    pub dest_path: Option<PathBuf>,
    pub metadata: Metadata,
    pub link: Option<Link>,
    pub hardlinks: Vec<Moveable>,
    pub symlinks: Vec<Moveable>,
    pub parents: DirChain,
}

impl Moveable {
    pub fn new(
        share: Arc<Share>,
        source: Arc<Storage>,
        source_path: PathBuf,
        metadata: Metadata,
        parents: DirChain,
    ) -> Self {
        Self {
            share,
            source,
            source_path,
            dest: None,
            dest_path: None,
            metadata,
            link: None,
            hardlinks: Vec::new(),
            symlinks: Vec::new(),
            parents,
        }
    }

    pub fn is_hardlink(&self) -> bool {
        matches!(self.link, Some(Link::Hard { .. }))
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.link, Some(Link::Sym(_)))
    }

    /// Neither hardlink nor symlink.
    pub fn is_regular(&self) -> bool {
        self.link.is_none()
    }

    pub fn kind(&self) -> MoveableKind {
        match &self.link {
            Some(Link::Hard { .. }) => MoveableKind::Hardlink,
            Some(Link::Sym(_)) => MoveableKind::Symlink,
            None if self.metadata.is_dir => MoveableKind::EmptyDir,
            None => MoveableKind::File,
        }
    }

    /// Path relative to the source volume mount.
    pub fn relative_path(&self) -> Option<&Path> {
        self.source_path.strip_prefix(self.source.fs_path()).ok()
    }

    /// Path relative to the share root on the source volume.
    pub fn share_relative_path(&self) -> Option<&Path> {
        self.relative_path()?.strip_prefix(self.share.name()).ok()
    }

    /// Bytes this moveable adds to a destination (hardlinks share the primary's data).
    pub fn size(&self) -> u64 {
        if self.metadata.is_regular() { self.metadata.size } else { 0 }
    }

    /// All source paths removed when this moveable completes.
    pub fn all_source_paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.source_path.as_path())
            .chain(self.hardlinks.iter().map(|h| h.source_path.as_path()))
            .chain(self.symlinks.iter().map(|s| s.source_path.as_path()))
    }

    /// Destination name used for queue bucketing.
    pub fn dest_name(&self) -> &str {
        self.dest.as_ref().map(|d| d.name()).unwrap_or("")
    }
}

impl QueueItem for Moveable {
    type Key = PathBuf;

    fn key(&self) -> PathBuf {
        self.source_path.clone()
    }

    fn weight(&self) -> u64 {
        self.size()
    }
}

/// Builders for tests: synthetic moveables and a scratch storage layout.
#[cfg(any(test, feature = "test-helpers"))]
#[allow(dead_code)]
pub mod test_support {
    use super::*;
    use crate::storage::Inventory;

    /// Temporary directory holding `disks` and `pools` as sibling mount points,
    /// each with an empty share root for every name in `shares`.
    pub fn scratch_inventory(disks: &[&str], pools: &[&str], shares: &[&str]) -> io::Result<(tempfile::TempDir, Inventory)> {
        let tmp = tempfile::tempdir()?;
        let mut inv = Inventory::new();
        for (name, is_disk) in disks.iter().map(|d| (d, true)).chain(pools.iter().map(|p| (p, false))) {
            let mount = tmp.path().join(name);
            for share in shares {
                fs::create_dir_all(mount.join(share))?;
            }
            fs::create_dir_all(&mount)?;
            inv = if is_disk { inv.with_disk(name, mount) } else { inv.with_pool(name, mount) };
        }
        Ok((tmp, inv))
    }

    /// Metadata for paths that do not exist on disk.
    pub fn fake_metadata(is_dir: bool, size: u64) -> Metadata {
        Metadata {
            inode: 1,
            dev: 1,
            nlink: 1,
            mode: if is_dir { 0o755 } else { 0o644 },
            uid: 0,
            gid: 0,
            atime: FileTime::zero(),
            mtime: FileTime::zero(),
            size,
            is_dir,
            is_symlink: false,
            symlink_target: None,
        }
    }

    /// Moveable for a path that need not exist; every ancestor from the share root
    /// down gets a synthetic directory record.
    pub fn synthetic(share: &Arc<Share>, source: &Arc<Storage>, path: &Path, size: u64) -> Moveable {
        let root = source.share_root(share);
        let mut dirs = vec![Directory::new(root.clone(), fake_metadata(true, 0))];
        let mut current = root.clone();
        if let Some(parent) = path.parent()
            && let Ok(rel) = parent.strip_prefix(&root)
        {
            for comp in rel.components() {
                current.push(comp);
                dirs.push(Directory::new(current.clone(), fake_metadata(true, 0)));
            }
        }
        Moveable::new(
            share.clone(),
            source.clone(),
            path.to_path_buf(),
            fake_metadata(false, size),
            DirChain::new(dirs),
        )
    }

    /// Build a moveable for an on-disk path under `<source>/<share>`.
    pub fn moveable_at(share: &Arc<Share>, source: &Arc<Storage>, path: &Path) -> Moveable {
        let root = source.share_root(share);
        let mut dirs = Vec::new();
        let mut current = root.clone();
        dirs.push(Directory::new(root.clone(), Metadata::from_path(&root).unwrap()));
        if let Some(parent) = path.parent()
            && let Ok(rel) = parent.strip_prefix(&root)
        {
            for comp in rel.components() {
                current.push(comp);
                dirs.push(Directory::new(current.clone(), Metadata::from_path(&current).unwrap()));
            }
        }
        Moveable::new(
            share.clone(),
            source.clone(),
            path.to_path_buf(),
            Metadata::from_path(path).unwrap(),
            DirChain::new(dirs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    #[test]
    fn metadata_snapshot_does_not_follow_symlinks() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("t.txt");
        fs::write(&target, b"12345").unwrap();
        let link = dir.path().join("l");
        symlink("t.txt", &link).unwrap();

        let m = Metadata::from_path(&link).unwrap();
        assert!(m.is_symlink);
        assert!(!m.is_regular());
        assert_eq!(m.symlink_target.as_deref(), Some(Path::new("t.txt")));

        let t = Metadata::from_path(&target).unwrap();
        assert!(t.is_regular());
        assert_eq!(t.size, 5);
        assert_ne!(t.inode, m.inode);
    }

    #[test]
    fn kind_and_relative_paths() {
        let dir = tempdir().unwrap();
        let source = Arc::new(Storage::pool("cache", dir.path()));
        let share = Arc::new(Share::new("media"));
        let sub = dir.path().join("media").join("a");
        fs::create_dir_all(&sub).unwrap();
        let file = sub.join("f.bin");
        fs::write(&file, b"abc").unwrap();

        let m = test_support::moveable_at(&share, &source, &file);
        assert_eq!(m.kind(), MoveableKind::File);
        assert!(m.is_regular());
        assert_eq!(m.relative_path(), Some(Path::new("media/a/f.bin")));
        assert_eq!(m.share_relative_path(), Some(Path::new("a/f.bin")));
        assert_eq!(m.size(), 3);
        assert_eq!(m.parents.len(), 2);
        assert_eq!(m.parents.shallowest().unwrap().source_path, dir.path().join("media"));
        assert_eq!(m.parents.deepest().unwrap().source_path, sub);
    }
}
