//! Default path helpers and symlink checks.
//! Determines config/state/log paths and detects symlinked ancestors for safety.

use anyhow::{Result, anyhow};
use dirs::{config_dir, data_local_dir};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "TIER_MOVE_CONFIG";

/// Config path: `$TIER_MOVE_CONFIG` (relative values resolve against the cwd),
/// else `<config dir>/tier_move/config.xml`.
pub fn default_config_path() -> Result<PathBuf> {
    if let Some(p) = env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        let p = PathBuf::from(p);
        if p.is_absolute() {
            return Ok(p);
        }
        return Ok(env::current_dir()?.join(p));
    }
    config_dir()
        .or_else(|| env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .map(|base| base.join("tier_move").join("config.xml"))
        .ok_or_else(|| anyhow!("cannot determine a config directory; set {CONFIG_ENV}"))
}

/// Whether the config path came from the environment.
pub fn config_from_env() -> bool {
    env::var_os(CONFIG_ENV).is_some_and(|v| !v.is_empty())
}

/// Directory holding the run lock.
pub fn default_state_dir() -> PathBuf {
    data_local_dir()
        .map(|d| d.join("tier_move"))
        .unwrap_or_else(|| env::temp_dir().join("tier_move"))
}

/// Suggested log file location (not created).
pub fn default_log_path() -> PathBuf {
    default_state_dir().join("tier_move.log")
}

/// Return true if any existing ancestor of `path` is a symlink.
pub fn path_has_symlink_ancestor(path: &Path) -> io::Result<bool> {
    let mut p = path.parent();
    while let Some(anc) = p {
        match fs::symlink_metadata(anc) {
            Ok(meta) if meta.file_type().is_symlink() => return Ok(true),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        p = anc.parent();
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn env_override_wins() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("custom.xml");
        unsafe { env::set_var(CONFIG_ENV, &file) };
        assert_eq!(default_config_path().unwrap(), file);
        assert!(config_from_env());
        unsafe { env::remove_var(CONFIG_ENV) };
        assert!(!config_from_env());
        assert!(default_config_path().unwrap().ends_with("tier_move/config.xml"));
    }

    #[test]
    fn detects_symlinked_ancestor() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        symlink(&real, &link).unwrap();
        assert!(path_has_symlink_ancestor(&link.join("config.xml")).unwrap());
        assert!(!path_has_symlink_ancestor(&real.join("missing").join("config.xml")).unwrap());
    }
}
