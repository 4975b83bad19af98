//! IO engine: moves one destination bucket, strictly one item at a time.
//!
//! Per item:
//! 1. refuse sources another process holds open,
//! 2. create missing ancestor directories on the destination (recorded for rollback),
//! 3. place the object: verified copy, directory, hardlink or symlink,
//! 4. restore metadata and remove the source.
//!
//! Any failure removes what this item created and leaves the source alone. After
//! the bucket drains, source directories emptied by the moves are pruned
//! deepest-first and the timestamps of directories created on the destination are
//! restored.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::copy::copy_to_temp;
use super::helpers::io_error;
use super::metadata::{apply_owner_and_mode, apply_times, preserve_xattrs, restore_metadata};
use super::util::is_empty_dir;
use crate::errors::TierMoveError;
use crate::inuse::InUseChecker;
use crate::moveable::{DirChain, Link, Metadata, Moveable, MoveableKind, SymTarget};
use crate::platform;
use crate::queue::{Decision, Progress, TaskQueue, process_sequential};
use crate::shutdown::CancelToken;

/// What one successful item left behind.
#[derive(Debug, Default, Clone)]
pub struct ItemReport {
    pub bytes: u64,
    /// Destination directories created for this item, shallowest first.
    pub created_dirs: Vec<(PathBuf, Metadata)>,
    /// Source ancestor directories that may now be empty.
    pub source_dirs: Vec<PathBuf>,
}

/// Outcome of draining one destination bucket.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BucketReport {
    pub destination: String,
    pub moved: usize,
    pub skipped: usize,
    pub bytes: u64,
    pub pruned_dirs: usize,
    pub progress: Progress,
}

/// Undo log for one item.
#[derive(Debug, Default)]
struct Undo {
    files: Vec<PathBuf>,
    dirs: Vec<(PathBuf, Metadata)>,
}

impl Undo {
    /// Remove what was placed, then the directories created for it that ended up empty.
    fn rollback(self) {
        for f in self.files.iter().rev() {
            let res = match fs::symlink_metadata(f) {
                Ok(m) if m.is_dir() => fs::remove_dir(f),
                Ok(_) => fs::remove_file(f),
                Err(_) => continue,
            };
            if let Err(e) = res {
                warn!(path = %f.display(), error = %e, "rollback: failed to remove destination artifact");
            }
        }
        for (d, _) in self.dirs.iter().rev() {
            if is_empty_dir(d)
                && let Err(e) = fs::remove_dir(d)
            {
                warn!(path = %d.display(), error = %e, "rollback: failed to remove created directory");
            }
        }
    }
}

pub struct Mover {
    inuse: Arc<dyn InUseChecker>,
    cancel: CancelToken,
    dry_run: bool,
}

impl Mover {
    pub fn new(inuse: Arc<dyn InUseChecker>, cancel: CancelToken) -> Self {
        Self {
            inuse,
            cancel,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Drain `queue` sequentially. Cleanup runs even when the run is canceled part-way;
    /// the cancellation is returned afterwards.
    pub fn process_queue(&self, queue: &TaskQueue<Moveable>) -> Result<BucketReport, TierMoveError> {
        let mut created: BTreeMap<PathBuf, Metadata> = BTreeMap::new();
        let mut source_dirs: BTreeSet<PathBuf> = BTreeSet::new();
        let mut bytes = 0u64;

        let drained = process_sequential(queue, &self.cancel, |m| match self.process_item(m) {
            Ok(report) => {
                bytes += report.bytes;
                created.extend(report.created_dirs);
                source_dirs.extend(report.source_dirs);
                Decision::Success
            }
            Err(e) => {
                warn!(
                    share = %m.share.name(),
                    path = %m.source_path.display(),
                    disk = %m.dest_name(),
                    code = e.code(),
                    kind = e.kind(),
                    error = %e,
                    "skipping: move failed"
                );
                Decision::Skipped
            }
        });

        let pruned_dirs = prune_empty_dirs(source_dirs);
        for (dir, meta) in created.iter().rev() {
            apply_times(dir, meta);
        }

        let progress = queue.progress();
        info!(
            destination = %queue.name(),
            moved = progress.success,
            skipped = progress.skipped,
            bytes,
            pruned_dirs,
            "bucket drained"
        );
        drained?;
        Ok(BucketReport {
            destination: queue.name().to_string(),
            moved: progress.success,
            skipped: progress.skipped,
            bytes,
            pruned_dirs,
            progress,
        })
    }

    /// Move one item with its hardlinks and symlinks.
    pub fn process_item(&self, m: &Moveable) -> Result<ItemReport, TierMoveError> {
        self.cancel.check()?;
        let dest_path = m
            .dest_path
            .as_deref()
            .ok_or_else(|| TierMoveError::invalid(&m.source_path, "no destination path"))?;

        if !m.metadata.is_dir
            && let Some(busy) = m.all_source_paths().find(|p| self.inuse.is_in_use(p))
        {
            return Err(TierMoveError::InUse(busy.to_path_buf()));
        }

        if self.dry_run {
            info!(
                share = %m.share.name(),
                src = %m.source_path.display(),
                dest = %dest_path.display(),
                hardlinks = m.hardlinks.len(),
                symlinks = m.symlinks.len(),
                "dry-run: would move"
            );
            return Ok(ItemReport {
                bytes: m.size(),
                ..Default::default()
            });
        }

        let mut undo = Undo::default();
        match self.move_group(m, dest_path, &mut undo) {
            Ok(bytes) => {
                info!(
                    share = %m.share.name(),
                    src = %m.source_path.display(),
                    dest = %dest_path.display(),
                    disk = %m.dest_name(),
                    bytes,
                    "moved"
                );
                Ok(ItemReport {
                    bytes,
                    created_dirs: undo.dirs,
                    source_dirs: source_dirs_of(m),
                })
            }
            Err(e) => {
                undo.rollback();
                Err(e)
            }
        }
    }

    fn move_group(&self, m: &Moveable, dest_path: &Path, undo: &mut Undo) -> Result<u64, TierMoveError> {
        let nocow = m.share.disable_cow;
        ensure_chain(&m.parents, undo, nocow)?;

        let mut bytes = 0;
        let mut created_dir = true;
        match m.kind() {
            MoveableKind::File => {
                let temp = copy_to_temp(&m.source_path, dest_path, &self.cancel, nocow)?;
                preserve_xattrs(&m.source_path, temp.tmp_path());
                bytes = temp.finalize()?;
                undo.files.push(dest_path.to_path_buf());
            }
            MoveableKind::EmptyDir => match fs::create_dir(dest_path) {
                Ok(()) => undo.files.push(dest_path.to_path_buf()),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dest_path.is_dir() => {
                    debug!(path = %dest_path.display(), "directory already present; keeping its permissions");
                    created_dir = false;
                }
                Err(e) => return Err(io_error("create directory", dest_path)(e)),
            },
            MoveableKind::Symlink => {
                place_symlink(m, dest_path)?;
                undo.files.push(dest_path.to_path_buf());
            }
            MoveableKind::Hardlink => {
                return Err(TierMoveError::invalid(&m.source_path, "hardlink cannot move on its own"));
            }
        }

        for h in &m.hardlinks {
            let h_dest = h
                .dest_path
                .as_deref()
                .ok_or_else(|| TierMoveError::invalid(&h.source_path, "no destination path"))?;
            ensure_chain(&h.parents, undo, nocow)?;
            fs::hard_link(dest_path, h_dest).map_err(io_error("create hardlink", h_dest))?;
            undo.files.push(h_dest.to_path_buf());
        }
        for s in &m.symlinks {
            let s_dest = s
                .dest_path
                .as_deref()
                .ok_or_else(|| TierMoveError::invalid(&s.source_path, "no destination path"))?;
            ensure_chain(&s.parents, undo, nocow)?;
            place_symlink(s, s_dest)?;
            undo.files.push(s_dest.to_path_buf());
        }

        // Everything is in place; the primary source goes first so a failure
        // here still rolls the whole group back.
        if created_dir {
            restore_metadata(dest_path, &m.metadata);
        }
        remove_source(m)?;

        for sub in m.hardlinks.iter().chain(m.symlinks.iter()) {
            if sub.is_symlink()
                && let Some(p) = sub.dest_path.as_deref()
            {
                restore_metadata(p, &sub.metadata);
            }
            if let Err(e) = remove_source(sub) {
                warn!(path = %sub.source_path.display(), error = %e, "moved, but failed to remove source link");
            }
        }
        Ok(bytes)
    }
}

/// Create every missing directory of the chain on the destination side.
fn ensure_chain(chain: &DirChain, undo: &mut Undo, nocow: bool) -> Result<(), TierMoveError> {
    for d in chain {
        let dp = d
            .dest_path
            .as_deref()
            .ok_or_else(|| TierMoveError::invalid(&d.source_path, "ancestor has no destination path"))?;
        match fs::symlink_metadata(dp) {
            Ok(meta) if meta.is_dir() => continue,
            Ok(_) => return Err(TierMoveError::invalid(dp, "exists on destination and is not a directory")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error("stat destination directory", dp)(e)),
        }
        match fs::create_dir(dp) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dp.is_dir() => continue,
            Err(e) => return Err(io_error("create destination directory", dp)(e)),
        }
        apply_owner_and_mode(dp, &d.metadata);
        if nocow && let Err(e) = platform::mark_nocow(dp) {
            debug!(path = %dp.display(), error = %e, "could not mark directory NOCOW");
        }
        debug!(path = %dp.display(), "created destination directory");
        undo.dirs.push((dp.to_path_buf(), d.metadata.clone()));
    }
    Ok(())
}

fn place_symlink(m: &Moveable, dest: &Path) -> Result<(), TierMoveError> {
    let target: &Path = match &m.link {
        Some(Link::Sym(SymTarget::External { raw })) => raw,
        Some(Link::Sym(SymTarget::Internal { target_dest, .. })) => {
            let resolved = target_dest
                .as_deref()
                .ok_or_else(|| TierMoveError::invalid(&m.source_path, "internal symlink has no target destination"))?;
            // A relative link that lands on the same volume as its target keeps its raw form.
            match m.metadata.symlink_target.as_deref() {
                Some(raw) if raw.is_relative() && same_volume(dest, resolved, m) => raw,
                _ => resolved,
            }
        }
        _ => return Err(TierMoveError::invalid(&m.source_path, "not a symlink")),
    };
    symlink(target, dest).map_err(io_error("create symlink", dest))
}

fn same_volume(link_dest: &Path, target_dest: &Path, m: &Moveable) -> bool {
    m.dest
        .as_ref()
        .is_some_and(|d| link_dest.starts_with(d.fs_path()) && target_dest.starts_with(d.fs_path()))
}

fn remove_source(m: &Moveable) -> Result<(), TierMoveError> {
    let res = if m.kind() == MoveableKind::EmptyDir {
        fs::remove_dir(&m.source_path)
    } else {
        fs::remove_file(&m.source_path)
    };
    res.map_err(io_error("remove source", &m.source_path))
}

/// Source-side ancestors below the share root of the item and its subordinates.
fn source_dirs_of(m: &Moveable) -> Vec<PathBuf> {
    std::iter::once(m)
        .chain(m.hardlinks.iter())
        .chain(m.symlinks.iter())
        .flat_map(|x| x.parents.iter().skip(1).map(|d| d.source_path.clone()))
        .collect()
}

/// Remove the empty ones among `dirs`, deepest first. Returns how many went.
fn prune_empty_dirs(dirs: BTreeSet<PathBuf>) -> usize {
    let mut ordered: Vec<PathBuf> = dirs.into_iter().collect();
    ordered.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    let mut pruned = 0;
    for dir in ordered {
        if !is_empty_dir(&dir) {
            continue;
        }
        match fs::remove_dir(&dir) {
            Ok(()) => {
                debug!(path = %dir.display(), "removed emptied source directory");
                pruned += 1;
            }
            Err(e) => debug!(path = %dir.display(), error = %e, "could not remove emptied source directory"),
        }
    }
    pruned
}
