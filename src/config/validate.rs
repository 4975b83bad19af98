//! Config validation logic.
//! Verifies storage mounts, cross-references between shares and storage, and
//! the share filter. Any failure here is configuration-fatal.

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;
use tracing::{debug, error, info};

use super::types::Config;
use crate::storage::AllocatorKind;

impl Config {
    /// Validate mounts and cross-references.
    pub fn validate(&self) -> Result<()> {
        let inv = &self.inventory;
        let storages: Vec<_> = inv.disks().chain(inv.pools()).collect();

        // 1) Every mount: absolute, an existing readable directory.
        for s in &storages {
            let label = format!("{} '{}'", if s.is_disk() { "disk" } else { "pool" }, s.name());
            if !s.fs_path().is_absolute() {
                bail!("{label} path must be absolute: {}", s.fs_path().display());
            }
            ensure_dir_exists_and_is_dir(s.fs_path(), &label)?;
            ensure_readable(s.fs_path(), &label)?;
        }

        // 2) Mounts are disjoint (neither contains the other).
        for (i, a) in storages.iter().enumerate() {
            for b in storages.iter().skip(i + 1) {
                if a.fs_path().starts_with(b.fs_path()) || b.fs_path().starts_with(a.fs_path()) {
                    bail!(
                        "storage '{}' ({}) and '{}' ({}) overlap",
                        a.name(),
                        a.fs_path().display(),
                        b.name(),
                        b.fs_path().display()
                    );
                }
            }
        }

        // 3) Shares reference known storage and parse.
        for share in inv.shares() {
            for pool in share.cache_pool.iter().chain(share.cache_pool2.iter()) {
                if inv.pool(pool).is_none() {
                    bail!("share '{}' references unknown pool '{pool}'", share.name());
                }
            }
            for disk in share.include_disks.iter().chain(share.exclude_disks.iter()) {
                if inv.disk(disk).is_none() {
                    bail!("share '{}' references unknown disk '{disk}'", share.name());
                }
            }
            if let Some(name) = share.allocator.as_deref()
                && AllocatorKind::parse(name).is_none()
            {
                bail!(
                    "share '{}': unknown allocator '{name}' (expected highwater|mostfree|fillup)",
                    share.name()
                );
            }
            if share.direction().is_none() {
                debug!(share = %share.name(), "share is not moved (use_cache no/only or no cache pool)");
            }
        }

        // 4) The share filter names real shares.
        for name in &self.only_shares {
            if inv.share(name).is_none() {
                error!("unknown share requested: {name}");
                bail!("unknown share requested: {name}");
            }
        }

        info!(
            disks = inv.disks().count(),
            pools = inv.pools().count(),
            shares = inv.shares().count(),
            state_dir = %self.state_dir.display(),
            "Config validated"
        );
        Ok(())
    }
}

/// Ensure path exists and is a directory; emit clear errors with path context.
fn ensure_dir_exists_and_is_dir(path: &Path, name: &str) -> Result<()> {
    if !path.exists() {
        error!("{name} does not exist: {}", path.display());
        bail!("{name} does not exist: {}", path.display());
    }
    if !path.is_dir() {
        error!("{name} is not a directory: {}", path.display());
        bail!("{name} is not a directory: {}", path.display());
    }
    Ok(())
}

/// Ensure directory is readable by attempting to open its entries.
fn ensure_readable(path: &Path, name: &str) -> Result<()> {
    fs::read_dir(path)
        .with_context(|| format!("Cannot read {name} directory '{}'; check permissions", path.display()))?;
    debug!("{name} readable: {}", path.display());
    Ok(())
}
