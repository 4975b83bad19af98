//! Config module (modularized).
//! Provides configuration types, default paths, XML loading, and validation.

pub mod paths;
pub mod types;
mod validate;
pub mod xml;

pub use paths::{CONFIG_ENV, default_config_path, default_log_path, default_state_dir, path_has_symlink_ancestor};
pub use types::{Config, LogLevel, parse_size};
pub use xml::{LoadResult, create_template_config, load_config_from_xml_path, load_or_init, parse_config_xml};
