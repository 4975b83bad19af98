//! Typed error definitions for tier_move.
//! Lower layers return these; orchestration decides whether to skip the item
//! or abort the run (only cancellation and configuration errors abort).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TierMoveError {
    #[error("no eligible disk can hold '{path}' ({size} bytes) for share {share}")]
    NotAllocatable {
        share: String,
        path: PathBuf,
        size: u64,
    },

    #[error("no disk statistics available for share {share}")]
    NoDiskStats { share: String },

    #[error("share {share} has no usable allocation method (configured: {method:?})")]
    NoAllocationMethod {
        share: String,
        method: Option<String>,
    },

    #[error("destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("invalid moveable '{path}': {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("source is in use by another process: {0}")]
    InUse(PathBuf),

    #[error("content hash mismatch for '{path}': source {expected}, destination {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("operation canceled")]
    Canceled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{message}")]
    Io {
        message: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TierMoveError {
    /// Stable numeric code for logs and exit statuses.
    pub fn code(&self) -> i32 {
        match self {
            TierMoveError::NotAllocatable { .. } => 10,
            TierMoveError::NoDiskStats { .. } => 11,
            TierMoveError::NoAllocationMethod { .. } => 12,
            TierMoveError::DestinationExists(_) => 20,
            TierMoveError::Invalid { .. } => 21,
            TierMoveError::InUse(_) => 30,
            TierMoveError::HashMismatch { .. } => 31,
            TierMoveError::Io { .. } => 32,
            TierMoveError::Canceled => 130,
            TierMoveError::Config(_) => 78,
        }
    }

    /// Short label used as the `kind` field in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TierMoveError::NotAllocatable { .. } => "not_allocatable",
            TierMoveError::NoDiskStats { .. } => "no_disk_stats",
            TierMoveError::NoAllocationMethod { .. } => "no_allocation_method",
            TierMoveError::DestinationExists(_) => "destination_exists",
            TierMoveError::Invalid { .. } => "invalid",
            TierMoveError::InUse(_) => "in_use",
            TierMoveError::HashMismatch { .. } => "hash_mismatch",
            TierMoveError::Io { .. } => "io",
            TierMoveError::Canceled => "canceled",
            TierMoveError::Config(_) => "config",
        }
    }

    /// Fatal errors end the enclosing call; everything else only skips an item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TierMoveError::Canceled | TierMoveError::Config(_))
    }

    pub(crate) fn invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TierMoveError::Invalid {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
