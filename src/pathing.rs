//! Destination path computation.
//!
//! Every path keeps its position relative to the volume mount:
//! `dest = <dest mount> + (source - <source mount>)`. The same mapping is applied
//! to the item, each ancestor directory, hardlinks, symlinks and the destination
//! of an internal symlink's target.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::TierMoveError;
use crate::moveable::{DirChain, Link, Moveable, SymTarget};
use crate::storage::{Inventory, Share, Storage};

/// Map `path` under `from`'s mount to the same relative position under `to`'s mount.
pub fn map_path(path: &Path, from: &Storage, to: &Storage) -> Result<PathBuf, TierMoveError> {
    let rel = path
        .strip_prefix(from.fs_path())
        .map_err(|_| TierMoveError::invalid(path, format!("not under source mount {}", from.fs_path().display())))?;
    Ok(to.fs_path().join(rel))
}

pub struct Pathing {
    inventory: Arc<Inventory>,
}

impl Pathing {
    pub fn new(inventory: Arc<Inventory>) -> Self {
        Self { inventory }
    }

    /// Fill in every destination path of `m`. Returns false (after a warning) when
    /// the item must be skipped.
    pub fn establish_path(&self, m: &mut Moveable) -> bool {
        match self.try_establish_path(m) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    share = %m.share.name(),
                    path = %m.source_path.display(),
                    disk = %m.dest_name(),
                    code = e.code(),
                    kind = e.kind(),
                    error = %e,
                    "skipping: cannot establish destination path"
                );
                false
            }
        }
    }

    pub fn try_establish_path(&self, m: &mut Moveable) -> Result<(), TierMoveError> {
        let dest = m
            .dest
            .clone()
            .ok_or_else(|| TierMoveError::invalid(&m.source_path, "no destination assigned"))?;
        let source = m.source.clone();

        self.assign(m, &source, &dest)?;

        for h in &mut m.hardlinks {
            let hdest = h.dest.get_or_insert_with(|| dest.clone()).clone();
            self.assign(h, &source, &hdest)?;
        }

        for s in &mut m.symlinks {
            let sdest = s.dest.get_or_insert_with(|| dest.clone()).clone();
            self.assign(s, &source, &sdest)?;
            if let Some(Link::Sym(SymTarget::Internal { target, target_dest })) = &mut s.link {
                *target_dest = Some(map_path(target, &source, &dest)?);
            }
        }
        debug!(
            src = %m.source_path.display(),
            dest = %m.dest_path.as_deref().unwrap_or(Path::new("")).display(),
            "established destination path"
        );
        Ok(())
    }

    fn assign(&self, m: &mut Moveable, source: &Storage, dest: &Arc<Storage>) -> Result<(), TierMoveError> {
        let dest_path = map_path(&m.source_path, source, dest)?;
        self.ensure_absent(&m.share, &m.source_path, source, dest)?;
        m.dest_path = Some(dest_path);
        map_chain(&mut m.parents, source, dest)
    }

    /// Reject items whose destination already exists as a non-directory on any
    /// volume it must not be duplicated on: every disk the share includes for a
    /// disk destination, the pool itself otherwise.
    fn ensure_absent(
        &self,
        share: &Share,
        source_path: &Path,
        source: &Storage,
        dest: &Arc<Storage>,
    ) -> Result<(), TierMoveError> {
        let mut targets = if dest.is_disk() {
            self.inventory.included_disks(share)
        } else {
            Vec::new()
        };
        if !targets.iter().any(|t| t.name() == dest.name()) {
            targets.push(dest.clone());
        }

        for t in targets {
            let candidate = map_path(source_path, source, &t)?;
            if let Ok(meta) = fs::symlink_metadata(&candidate)
                && !meta.is_dir()
            {
                return Err(TierMoveError::DestinationExists(candidate));
            }
        }
        Ok(())
    }
}

fn map_chain(chain: &mut DirChain, source: &Storage, dest: &Storage) -> Result<(), TierMoveError> {
    for d in chain.iter_mut() {
        d.dest_path = Some(map_path(&d.source_path, source, dest)?);
    }
    Ok(())
}
