//! Structural checks on a fully populated moveable.
//!
//! Validation only reads; running it any number of times on a valid moveable
//! leaves it unchanged and keeps succeeding.

use std::path::Path;
use tracing::warn;

use crate::errors::TierMoveError;
use crate::moveable::{Link, Moveable, SymTarget};

/// Warn and return false when `m` fails any structural check.
pub fn validate_moveable(m: &Moveable) -> bool {
    match check_moveable(m) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                share = %m.share.name(),
                path = %m.source_path.display(),
                disk = %m.dest_name(),
                code = e.code(),
                error = %e,
                "skipping: invalid moveable"
            );
            false
        }
    }
}

pub fn check_moveable(m: &Moveable) -> Result<(), TierMoveError> {
    check_node(m)?;

    match &m.link {
        Some(_) => {
            if !m.hardlinks.is_empty() || !m.symlinks.is_empty() {
                return Err(TierMoveError::invalid(&m.source_path, "link owns sub-links"));
            }
        }
        None => {
            for h in &m.hardlinks {
                match &h.link {
                    Some(Link::Hard { primary }) if primary == &m.source_path => {}
                    _ => return Err(TierMoveError::invalid(&h.source_path, "hardlink does not point at its primary")),
                }
                check_node(h)?;
                if !h.hardlinks.is_empty() || !h.symlinks.is_empty() {
                    return Err(TierMoveError::invalid(&h.source_path, "hardlink owns sub-links"));
                }
            }
            for s in &m.symlinks {
                match &s.link {
                    Some(Link::Sym(SymTarget::Internal { target, target_dest })) => {
                        if target_dest.as_deref().is_none_or(|p| !p.is_absolute()) {
                            return Err(TierMoveError::invalid(&s.source_path, "internal symlink has no target destination"));
                        }
                        if !m.all_source_paths().any(|p| p == target.as_path()) {
                            return Err(TierMoveError::invalid(&s.source_path, "internal symlink target is not its owner"));
                        }
                    }
                    _ => return Err(TierMoveError::invalid(&s.source_path, "symlink subordinate is not an internal link")),
                }
                check_node(s)?;
                if !s.hardlinks.is_empty() || !s.symlinks.is_empty() {
                    return Err(TierMoveError::invalid(&s.source_path, "symlink owns sub-links"));
                }
            }
        }
    }
    Ok(())
}

/// Checks shared by top-level moveables and subordinates.
fn check_node(m: &Moveable) -> Result<(), TierMoveError> {
    let path = &m.source_path;
    let dest = m
        .dest
        .as_ref()
        .ok_or_else(|| TierMoveError::invalid(path, "no destination storage"))?;
    let dest_path = m
        .dest_path
        .as_ref()
        .ok_or_else(|| TierMoveError::invalid(path, "no destination path"))?;

    if !path.is_absolute() || !dest_path.is_absolute() {
        return Err(TierMoveError::invalid(path, "paths must be absolute"));
    }
    let source_root = m.source.share_root(&m.share);
    let dest_root = dest.share_root(&m.share);
    if !path.starts_with(&source_root) || path == &source_root {
        return Err(TierMoveError::invalid(path, "source path is not inside the share on its source"));
    }
    if !dest_path.starts_with(&dest_root) || dest_path == &dest_root {
        return Err(TierMoveError::invalid(path, "destination path is not inside the share on its destination"));
    }

    let is_sym = matches!(m.link, Some(Link::Sym(_)));
    if is_sym != m.metadata.is_symlink {
        return Err(TierMoveError::invalid(path, "symlink role disagrees with metadata"));
    }
    if let Some(Link::Hard { primary }) = &m.link
        && !primary.is_absolute()
    {
        return Err(TierMoveError::invalid(path, "hardlink primary is not absolute"));
    }

    let first = m
        .parents
        .shallowest()
        .ok_or_else(|| TierMoveError::invalid(path, "no ancestor directories"))?;
    if first.source_path != source_root {
        return Err(TierMoveError::invalid(path, "ancestor chain does not start at the source share root"));
    }
    if first.dest_path.as_deref() != Some(dest_root.as_path()) {
        return Err(TierMoveError::invalid(path, "ancestor chain does not start at the destination share root"));
    }

    let mut expected_parent: Option<&Path> = None;
    for d in &m.parents {
        if !d.metadata.is_dir || d.metadata.is_symlink {
            return Err(TierMoveError::invalid(&d.source_path, "ancestor is not a directory"));
        }
        let Some(d_dest) = d.dest_path.as_deref() else {
            return Err(TierMoveError::invalid(&d.source_path, "ancestor has no destination path"));
        };
        if !d.source_path.is_absolute() || !d_dest.is_absolute() {
            return Err(TierMoveError::invalid(&d.source_path, "ancestor paths must be absolute"));
        }
        if let Some(parent) = expected_parent
            && d.source_path.parent() != Some(parent)
        {
            return Err(TierMoveError::invalid(&d.source_path, "ancestor chain is not connected"));
        }
        expected_parent = Some(&d.source_path);
    }
    if path.parent() != expected_parent {
        return Err(TierMoveError::invalid(path, "ancestor chain does not end at the parent directory"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moveable::test_support::synthetic;
    use crate::pathing::Pathing;
    use crate::storage::{Inventory, Share, Storage};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn valid() -> Moveable {
        let inv = Arc::new(
            Inventory::new()
                .with_pool("cache", "/nonexistent/cache")
                .with_disk("disk1", "/nonexistent/disk1")
                .with_share(Share::new("media")),
        );
        let share = inv.share("media").unwrap();
        let cache = inv.pool("cache").unwrap();
        let mut m = synthetic(&share, &cache, Path::new("/nonexistent/cache/media/a/b/f.bin"), 3);
        m.dest = inv.disk("disk1");
        assert!(Pathing::new(inv).establish_path(&mut m));
        m
    }

    #[test]
    fn validation_is_idempotent() {
        let m = valid();
        let before = m.clone();
        assert!(validate_moveable(&m));
        assert!(validate_moveable(&m));
        assert_eq!(m, before);
    }

    #[test]
    fn missing_destination_fails() {
        let mut m = valid();
        m.dest_path = None;
        assert!(!validate_moveable(&m));
    }

    #[test]
    fn path_outside_share_fails() {
        let mut m = valid();
        m.dest_path = Some(PathBuf::from("/elsewhere/f.bin"));
        assert!(check_moveable(&m).is_err());
    }

    #[test]
    fn broken_chain_fails() {
        let mut m = valid();
        m.parents = crate::moveable::DirChain::new(m.parents.iter().take(1).cloned().collect());
        assert!(matches!(check_moveable(&m), Err(TierMoveError::Invalid { .. })));
    }

    #[test]
    fn symlink_ancestor_fails() {
        let mut m = valid();
        if let Some(d) = m.parents.iter_mut().last() {
            d.metadata.is_symlink = true;
        }
        assert!(check_moveable(&m).is_err());
    }

    #[test]
    fn link_with_sub_links_fails() {
        let mut m = valid();
        let sub = m.clone();
        m.link = Some(Link::Hard { primary: PathBuf::from("/nonexistent/cache/media/x") });
        m.hardlinks.push(sub);
        assert!(check_moveable(&m).is_err());
    }

    #[test]
    fn hardlink_must_point_at_primary() {
        let mut m = valid();
        let mut h = m.clone();
        h.link = Some(Link::Hard { primary: PathBuf::from("/nonexistent/cache/media/other") });
        m.hardlinks.push(h.clone());
        assert!(check_moveable(&m).is_err());

        m.hardlinks[0].link = Some(Link::Hard { primary: m.source_path.clone() });
        assert!(check_moveable(&m).is_ok());
    }

    #[test]
    fn storage_mismatch_is_detected() {
        let mut m = valid();
        m.dest = Some(Arc::new(Storage::disk("disk9", "/nonexistent/disk9")));
        assert!(check_moveable(&m).is_err());
    }
}
