//! Filesystem operations: modularized.

mod atomic;
mod copy;
mod helpers;
mod io_copy;
mod lock;
mod metadata;
mod mover;
mod util;

pub use atomic::rename_no_clobber;
pub use copy::{TempCopy, copy_to_temp, verified_copy};
pub use helpers::{io_error, io_error_with_help, io_error_with_help_io};
pub use lock::{LOCK_FILE_NAME, RunLock, lock_file_path, try_acquire_run_lock};
pub use metadata::{apply_owner_and_mode, apply_times, preserve_xattrs, restore_metadata};
pub use mover::{BucketReport, ItemReport, Mover};
pub use util::is_empty_dir;
