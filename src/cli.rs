//! CLI definition and parsing.
//! Defines Args and provides parse() for command-line handling.
//!
//! Notes:
//! - --debug is a shorthand for --log-level debug.
//! - --share may repeat; without it every configured share is considered.

use clap::{Parser, ValueHint};
use std::path::PathBuf;

use crate::config::types::{Config, LogLevel};

/// Move share contents between cache pools and array disks.
/// CLI flags override config values (which are loaded from XML).
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Move share contents between cache pools and array disks (Rust)")]
pub struct Args {
    /// Config file to use instead of TIER_MOVE_CONFIG or the default location.
    #[arg(long, short = 'c', value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Only process these shares (repeatable).
    #[arg(long = "share", short = 's', value_name = "NAME")]
    pub shares: Vec<String>,

    /// Enable debug logging (equivalent to `--log-level debug`).
    #[arg(short = 'd', long, help = "Enable debug logging (shorthand for --log-level debug)")]
    pub debug: bool,

    /// Set log level. One of: quiet, normal, info, debug.
    #[arg(long, help = "Set log level: quiet, normal, info, debug")]
    pub log_level: Option<String>,

    /// Write logs to this file in addition to stderr.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,

    /// Print where tier_move will look for the config file, then exit.
    #[arg(long, help = "Print the config file location used by tier_move and exit")]
    pub print_config: bool,

    /// Dry-run: plan every move but do not modify the filesystem.
    #[arg(long, help = "Show what would be moved, but do not modify files/directories")]
    pub dry_run: bool,

    /// Threads for scanning and planning (defaults to the CPU count).
    #[arg(long, short = 'j', value_name = "N")]
    pub workers: Option<usize>,

    /// Emit logs in structured JSON (includes timestamp, level, and structured fields).
    #[arg(long, help = "Emit logs in structured JSON")]
    pub json: bool,
}

impl Args {
    /// Effective log level derived from flags.
    /// Precedence: --debug > --log-level value > None (use config default).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            return Some(LogLevel::Debug);
        }
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Apply CLI overrides to a loaded Config (in-place). No-ops for unset flags.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(level) = self.effective_log_level() {
            cfg.log_level = level;
        }
        if let Some(file) = &self.log_file {
            cfg.log_file = Some(file.clone());
        }
        if self.dry_run {
            cfg.dry_run = true;
        }
        if let Some(w) = self.workers.filter(|w| *w > 0) {
            cfg.workers = Some(w);
        }
        if !self.shares.is_empty() {
            cfg.only_shares = self.shares.clone();
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_only_when_set() {
        let args = Args::parse_from(["tier_move", "--dry-run", "-s", "media", "--share", "tv", "-j", "3"]);
        let mut cfg = Config::default();
        args.apply_overrides(&mut cfg);
        assert!(cfg.dry_run);
        assert_eq!(cfg.workers, Some(3));
        assert_eq!(cfg.only_shares, vec!["media", "tv"]);
        assert_eq!(cfg.log_level, LogLevel::Normal);

        let quiet = Args::parse_from(["tier_move"]);
        let mut cfg2 = Config::default();
        cfg2.dry_run = true;
        quiet.apply_overrides(&mut cfg2);
        assert!(cfg2.dry_run, "unset flags never clear config values");
    }

    #[test]
    fn debug_beats_log_level() {
        let args = Args::parse_from(["tier_move", "--log-level", "quiet", "--debug"]);
        assert_eq!(args.effective_log_level(), Some(LogLevel::Debug));
        let args = Args::parse_from(["tier_move", "--log-level", "info"]);
        assert_eq!(args.effective_log_level(), Some(LogLevel::Info));
    }
}
