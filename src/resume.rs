//! Resume / reconciliation pass.
//! Removes orphaned `*.tier_move.partial` copy targets left behind by an
//! interrupted run. Runs before every migration so headless deployments
//! self-heal after crashes or power loss.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::errors::TierMoveError;
use crate::platform::is_partial_name;
use crate::shutdown::CancelToken;
use crate::storage::{Inventory, Share};

/// Sweep every volume's root of each share in `shares`. Returns how many orphans went.
pub fn reconcile(inventory: &Inventory, shares: &[Arc<Share>], cancel: &CancelToken) -> Result<usize, TierMoveError> {
    let mut removed = 0;
    for share in shares {
        for storage in inventory.disks().chain(inventory.pools()) {
            cancel.check()?;
            removed += cleanup_partials(&storage.share_root(share), cancel)?;
        }
    }
    if removed > 0 {
        info!(removed, "removed orphaned partial copies from an earlier run");
    }
    Ok(removed)
}

fn cleanup_partials(root: &Path, cancel: &CancelToken) -> Result<usize, TierMoveError> {
    if !root.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        cancel.check()?;
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().is_file() || !is_partial_name(entry.file_name()) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "removed orphan partial copy");
                removed += 1;
            }
            Err(e) => warn!(error = %e, path = %entry.path().display(), "failed to remove orphan partial copy"),
        }
    }
    Ok(removed)
}
