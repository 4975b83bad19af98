//! Core library for `tier_move`.
//!
//! Relocates share contents between cache pools and array disks. A run walks
//! each source, places every item on a destination (allocation strategies plus
//! split-level affinity for array-bound moves), validates the plan, then moves
//! items with checksummed copies, one IO bucket per destination.
//!
//! Stage order: `resume` (orphaned partial copies) -> `walker` -> `allocation`
//! -> `pathing` -> `validator` -> `fs_ops::Mover`, driven by `pipeline`
//! through the `queue` primitives.

#[cfg(not(unix))]
compile_error!("tier_move relies on Unix inode, ownership and hardlink semantics");

pub mod allocation;
pub mod cli;
pub mod config;
pub mod errors;
pub mod fs_ops;
pub mod inuse;
pub mod moveable;
pub mod output;
pub mod pathing;
pub mod pipeline;
pub mod platform;
pub mod queue;
pub mod resume;
pub mod shutdown;
pub mod storage;
pub mod usage;
pub mod validator;
pub mod walker;

pub use allocation::Allocator;
pub use config::{Config, LogLevel};
pub use errors::TierMoveError;
pub use fs_ops::{BucketReport, Mover};
pub use inuse::{InUseChecker, ProcFdScanner};
pub use moveable::{Moveable, MoveableKind};
pub use pipeline::{Pipeline, RunSummary};
pub use shutdown::CancelToken;
pub use storage::{Inventory, MoveDirection, Share, Storage};
pub use usage::{DiskUsageProvider, StatvfsUsage};
