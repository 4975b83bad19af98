//! Platform-specific helpers.
//! The engine depends on Unix inode, ownership and link semantics, so only the
//! Unix implementation exists; this module keeps the OS calls in one place.

mod temp;
mod unix;

pub use temp::{is_partial_name, partial_sibling_name, tmp_config_sibling_name, PARTIAL_SUFFIX};
pub use unix::{disk_usage, mark_nocow, open_private_append, set_mode, write_private_atomic};
