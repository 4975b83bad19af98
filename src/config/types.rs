//! Core configuration types.
//! - Config holds runtime settings plus the storage inventory the engine works on.
//! - LogLevel represents verbosity with simple parsing helpers.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::paths;
use crate::inuse::DEFAULT_INUSE_REFRESH;
use crate::storage::{Inventory, Share};
use crate::usage::DEFAULT_USAGE_REFRESH;

/// Program-defined verbosity levels exposed to users/config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Only errors
    Quiet,
    /// Moves, warnings and the run summary (default)
    #[default]
    Normal,
    /// Planning detail
    Info,
    /// Debug/trace
    Debug,
}

impl LogLevel {
    /// Parse common string names into our LogLevel (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quiet" | "error" | "none" => Some(LogLevel::Quiet),
            "normal" | "warn" => Some(LogLevel::Normal),
            "info" | "verbose" | "detailed" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Normal => "normal",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid log level: '{s}'"))
    }
}

/// Runtime configuration for a migration run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Console verbosity
    pub log_level: LogLevel,
    /// Optional path to a log file
    pub log_file: Option<PathBuf>,
    /// If true, plan everything but do not modify the filesystem
    pub dry_run: bool,
    /// Worker count for the enumeration and evaluation stages (None = CPU count)
    pub workers: Option<usize>,
    /// How long a disk-usage probe stays fresh
    pub usage_refresh: Duration,
    /// How long the open-file scan stays fresh
    pub inuse_refresh: Duration,
    /// Where the run lock lives
    pub state_dir: PathBuf,
    /// Disks, pools and shares
    pub inventory: Inventory,
    /// Restrict the run to these shares (empty = all)
    pub only_shares: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Normal,
            log_file: None,
            dry_run: false,
            workers: None,
            usage_refresh: DEFAULT_USAGE_REFRESH,
            inuse_refresh: DEFAULT_INUSE_REFRESH,
            state_dir: paths::default_state_dir(),
            inventory: Inventory::new(),
            only_shares: Vec::new(),
        }
    }
}

impl Config {
    /// Config over an explicit inventory; other fields use defaults.
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory,
            ..Default::default()
        }
    }

    /// Shares this run processes, in name order.
    pub fn selected_shares(&self) -> Vec<Arc<Share>> {
        self.inventory
            .shares()
            .filter(|s| self.only_shares.is_empty() || self.only_shares.iter().any(|n| n == s.name()))
            .cloned()
            .collect()
    }
}

/// Parse a byte count with an optional binary suffix: `4096`, `500M`, `20GiB`, `1T`.
pub fn parse_size(s: &str) -> Option<u64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    let upper = t.to_ascii_uppercase();
    let digits_end = upper.find(|c: char| !c.is_ascii_digit()).unwrap_or(upper.len());
    let (num, unit) = upper.split_at(digits_end);
    let n: u64 = num.parse().ok()?;
    let shift = match unit.trim() {
        "" | "B" => 0,
        "K" | "KB" | "KIB" => 10,
        "M" | "MB" | "MIB" => 20,
        "G" | "GB" | "GIB" => 30,
        "T" | "TB" | "TIB" => 40,
        _ => return None,
    };
    n.checked_mul(1u64 << shift)
}
