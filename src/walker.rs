//! Tree walker and link resolver.
//!
//! Walks `<source>/<share>` and turns what it finds into top-level moveables:
//! - non-empty directories are only recorded as ancestors,
//! - regular files, empty directories and symlinks become moveables,
//! - later names of an already seen inode become hardlinks of the first one,
//! - symlinks whose target is another moveable of the same walk ride along with it;
//!   all others keep their raw target and move on their own.
//!
//! Groups with any member currently open by another process are dropped.

use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::errors::TierMoveError;
use crate::fs_ops::io_error;
use crate::inuse::InUseChecker;
use crate::moveable::{DirChain, Directory, Link, Metadata, Moveable, SymTarget};
use crate::platform::is_partial_name;
use crate::shutdown::CancelToken;
use crate::storage::{Share, Storage};

pub struct Walker {
    inuse: Arc<dyn InUseChecker>,
    cancel: CancelToken,
}

impl Walker {
    pub fn new(inuse: Arc<dyn InUseChecker>, cancel: CancelToken) -> Self {
        Self { inuse, cancel }
    }

    /// Discover the moveables of `share` on `src`. `dst` is set on every moveable
    /// when the destination is fixed (a pool); array destinations are left unset.
    pub fn get_moveables(
        &self,
        share: &Arc<Share>,
        src: &Arc<Storage>,
        dst: Option<Arc<Storage>>,
    ) -> Result<Vec<Moveable>, TierMoveError> {
        let root = src.share_root(share);
        match fs::symlink_metadata(&root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                warn!(share = %share.name(), path = %root.display(), "share root is not a directory; nothing to walk");
                return Ok(Vec::new());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(share = %share.name(), source = %src, "share absent on source");
                return Ok(Vec::new());
            }
            Err(e) => return Err(io_error("stat share root", &root)(e)),
        }

        let mut dirs: HashMap<PathBuf, Directory> = HashMap::new();
        let mut top: Vec<Moveable> = Vec::new();
        let mut links: Vec<Moveable> = Vec::new();
        // (dev, inode) -> index of the primary in `top`
        let mut inodes: HashMap<(u64, u64), usize> = HashMap::new();
        // source path -> index in `top` of the moveable that owns that name
        let mut by_path: HashMap<PathBuf, usize> = HashMap::new();

        for entry in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
            self.cancel.check()?;
            let entry = match entry {
                Ok(e) => e,
                Err(e) if e.depth() == 0 => {
                    let io = e.into_io_error().unwrap_or_else(|| std::io::Error::other("walk failed"));
                    return Err(io_error("walk share root", &root)(io));
                }
                Err(e) => {
                    warn!(share = %share.name(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            let ftype = entry.file_type();

            if !ftype.is_dir() && is_partial_name(entry.file_name()) {
                debug!(path = %path.display(), "ignoring leftover partial copy");
                continue;
            }

            let metadata = match Metadata::from_path(path) {
                Ok(m) => m,
                Err(e) => {
                    warn!(share = %share.name(), path = %path.display(), error = %e, "skipping: cannot stat");
                    continue;
                }
            };

            if ftype.is_dir() {
                if entry.depth() == 0 || !is_empty_dir(path) {
                    dirs.insert(path.to_path_buf(), Directory::new(path.to_path_buf(), metadata));
                    continue;
                }
            } else if !ftype.is_file() && !ftype.is_symlink() {
                debug!(path = %path.display(), "skipping special file");
                continue;
            }

            let Some(parents) = chain_for(&dirs, &root, path) else {
                warn!(share = %share.name(), path = %path.display(), "skipping: ancestor chain incomplete");
                continue;
            };
            let mut m = Moveable::new(share.clone(), src.clone(), path.to_path_buf(), metadata, parents);
            m.dest = dst.clone();

            if ftype.is_symlink() {
                links.push(m);
                continue;
            }

            if ftype.is_file() && m.metadata.nlink > 1 {
                let id = (m.metadata.dev, m.metadata.inode);
                if let Some(&idx) = inodes.get(&id) {
                    m.link = Some(Link::Hard {
                        primary: top[idx].source_path.clone(),
                    });
                    by_path.insert(m.source_path.clone(), idx);
                    top[idx].hardlinks.push(m);
                    continue;
                }
                inodes.insert(id, top.len());
            }
            by_path.insert(m.source_path.clone(), top.len());
            top.push(m);
        }

        for mut link in links {
            let raw = link.metadata.symlink_target.clone().unwrap_or_default();
            let resolved = resolve_link_target(&link.source_path, &raw);
            match by_path.get(&resolved) {
                Some(&idx) => {
                    link.link = Some(Link::Sym(SymTarget::Internal {
                        target: resolved,
                        target_dest: None,
                    }));
                    top[idx].symlinks.push(link);
                }
                None => {
                    link.link = Some(Link::Sym(SymTarget::External { raw }));
                    top.push(link);
                }
            }
        }

        let found = top.len();
        let kept: Vec<Moveable> = top
            .into_par_iter()
            .filter(|m| {
                if m.metadata.is_dir {
                    return true;
                }
                let busy = m.all_source_paths().find(|p| self.inuse.is_in_use(p));
                match busy {
                    Some(p) => {
                        warn!(share = %m.share.name(), path = %p.display(), "skipping: file is in use");
                        false
                    }
                    None => true,
                }
            })
            .collect();

        info!(
            share = %share.name(),
            source = %src,
            found,
            kept = kept.len(),
            directories = dirs.len(),
            "walked share"
        );
        Ok(kept)
    }
}

fn is_empty_dir(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut it) => it.next().is_none(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot list directory; treating as non-empty");
            false
        }
    }
}

/// Ancestor chain from the share root down to `path`'s parent.
fn chain_for(dirs: &HashMap<PathBuf, Directory>, root: &Path, path: &Path) -> Option<DirChain> {
    let mut chain: Vec<Directory> = path
        .ancestors()
        .skip(1)
        .take_while(|a| a.starts_with(root))
        .map(|a| dirs.get(a).cloned())
        .collect::<Option<_>>()?;
    chain.reverse();
    Some(DirChain::new(chain))
}

/// Absolute, lexically normalized target of a symlink at `link` with raw target `raw`.
fn resolve_link_target(link: &Path, raw: &Path) -> PathBuf {
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        link.parent().unwrap_or(Path::new("/")).join(raw)
    };
    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}
