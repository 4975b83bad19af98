//! XML configuration support.
//! - Loads settings, disks, pools and shares from config.xml (quick_xml + serde).
//! - Creates a secure template if the default file is missing.
//!
//! Notes:
//! - This module only reads/writes the config file; semantic checks live in `validate`.
//! - Unknown elements or attributes are rejected so typos surface early.
//! - Repeated `<disk>`, `<pool>` and `<share>` elements must be grouped together.

use anyhow::{Context, Result, anyhow, bail};
use quick_xml::de::from_str as from_xml_str;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use super::paths::{config_from_env, default_config_path, default_log_path, path_has_symlink_ancestor};
use super::types::{Config, LogLevel, parse_size};
use crate::fs_ops::io_error_with_help;
use crate::platform::{set_mode, write_private_atomic};
use crate::storage::{Inventory, Share, Storage, UseCache};

#[derive(Debug, Deserialize)]
#[serde(rename = "config")]
#[serde(deny_unknown_fields)]
struct XmlConfig {
    log_level: Option<String>,
    log_file: Option<String>,
    dry_run: Option<bool>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    workers: Option<u64>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    usage_refresh_ms: Option<u64>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    inuse_refresh_ms: Option<u64>,
    state_dir: Option<String>,
    #[serde(rename = "disk", default)]
    disks: Vec<XmlStorage>,
    #[serde(rename = "pool", default)]
    pools: Vec<XmlStorage>,
    #[serde(rename = "share", default)]
    shares: Vec<XmlShare>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct XmlStorage {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@path")]
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct XmlShare {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@use_cache")]
    use_cache: Option<String>,
    #[serde(rename = "@cache_pool")]
    cache_pool: Option<String>,
    #[serde(rename = "@cache_pool2")]
    cache_pool2: Option<String>,
    #[serde(rename = "@allocator")]
    allocator: Option<String>,
    #[serde(rename = "@split_level")]
    split_level: Option<String>,
    #[serde(rename = "@floor")]
    floor: Option<String>,
    #[serde(rename = "@include")]
    include: Option<String>,
    #[serde(rename = "@exclude")]
    exclude: Option<String>,
    #[serde(rename = "@cow")]
    cow: Option<String>,
}

// Custom deserializer that trims surrounding whitespace for optional u64
fn de_u64_trimmed_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<u64>().map(Some).map_err(serde::de::Error::custom),
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string)
}

fn name_list(s: Option<&str>) -> Vec<String> {
    s.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn xml_to_share(x: XmlShare) -> Result<Share> {
    let name = x.name.trim().to_string();
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        bail!("invalid share name '{}'", x.name);
    }
    let mut share = Share::new(name.clone());
    share.use_cache = x
        .use_cache
        .as_deref()
        .map(str::parse::<UseCache>)
        .transpose()
        .with_context(|| format!("share '{name}'"))?
        .unwrap_or_default();
    share.cache_pool = non_empty(x.cache_pool.as_deref());
    share.cache_pool2 = non_empty(x.cache_pool2.as_deref());
    share.allocator = non_empty(x.allocator.as_deref());
    if let Some(level) = non_empty(x.split_level.as_deref()) {
        share.split_level = level
            .parse()
            .map_err(|_| anyhow!("share '{name}': split_level '{level}' is not an integer"))?;
    }
    if let Some(floor) = non_empty(x.floor.as_deref()) {
        share.space_floor =
            parse_size(&floor).ok_or_else(|| anyhow!("share '{name}': floor '{floor}' is not a size"))?;
    }
    share.include_disks = name_list(x.include.as_deref());
    share.exclude_disks = name_list(x.exclude.as_deref());
    share.disable_cow = match x.cow.as_deref().map(|c| c.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("auto") | Some("yes") => false,
        Some("no") => true,
        Some(other) => bail!("share '{name}': cow '{other}' must be auto or no"),
    };
    Ok(share)
}

fn xml_to_config(parsed: XmlConfig) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(s) = parsed.log_level.as_deref() {
        cfg.log_level = s.trim().parse::<LogLevel>().map_err(|e| anyhow!(e))?;
    }
    cfg.log_file = non_empty(parsed.log_file.as_deref()).map(PathBuf::from);
    cfg.dry_run = parsed.dry_run.unwrap_or(false);
    cfg.workers = parsed.workers.map(|w| w as usize).filter(|w| *w > 0);
    if let Some(ms) = parsed.usage_refresh_ms {
        cfg.usage_refresh = Duration::from_millis(ms);
    }
    if let Some(ms) = parsed.inuse_refresh_ms {
        cfg.inuse_refresh = Duration::from_millis(ms);
    }
    if let Some(dir) = non_empty(parsed.state_dir.as_deref()) {
        cfg.state_dir = PathBuf::from(dir);
    }

    let mut inventory = Inventory::new();
    let mut names = BTreeSet::new();
    for (x, is_disk) in parsed
        .disks
        .into_iter()
        .map(|d| (d, true))
        .chain(parsed.pools.into_iter().map(|p| (p, false)))
    {
        let name = x.name.trim().to_string();
        if name.is_empty() {
            bail!("storage with empty name (path '{}')", x.path);
        }
        if !names.insert(name.clone()) {
            bail!("storage name '{name}' is declared more than once");
        }
        let path = PathBuf::from(x.path.trim());
        inventory.add_storage(if is_disk { Storage::disk(name, path) } else { Storage::pool(name, path) });
    }
    let mut share_names = BTreeSet::new();
    for x in parsed.shares {
        let share = xml_to_share(x)?;
        if !share_names.insert(share.name.clone()) {
            bail!("share '{}' is declared more than once", share.name);
        }
        inventory.add_share(share);
    }
    cfg.inventory = inventory;
    Ok(cfg)
}

/// Parse config XML text.
pub fn parse_config_xml(contents: &str) -> Result<Config> {
    let parsed: XmlConfig = from_xml_str(contents).context("parse config xml")?;
    xml_to_config(parsed)
}

/// Load a Config from a specific XML file path.
pub fn load_config_from_xml_path(path: &Path) -> Result<Config> {
    let contents =
        fs::read_to_string(path).map_err(io_error_with_help("read config xml", path))?;
    parse_config_xml(&contents).with_context(|| format!("config file '{}'", path.display()))
}

/// Outcome of locating the config file.
#[derive(Debug)]
pub enum LoadResult {
    Loaded(Box<Config>, PathBuf),
    /// No config existed at the default location; a template was written there.
    CreatedTemplate(PathBuf),
}

/// Load the config, writing a template first if the default file is missing.
/// An explicit `$TIER_MOVE_CONFIG` that does not exist is an error.
pub fn load_or_init() -> Result<LoadResult> {
    let path = default_config_path()?;
    if !path.exists() {
        if config_from_env() {
            bail!("config file named by TIER_MOVE_CONFIG does not exist: {}", path.display());
        }
        create_template_config(&path)?;
        return Ok(LoadResult::CreatedTemplate(path));
    }
    let cfg = load_config_from_xml_path(&path)?;
    Ok(LoadResult::Loaded(Box::new(cfg), path))
}

/// Create the template config file and parent directory (best-effort permissions).
/// Uses secure creation to avoid following attacker-controlled symlinks.
pub fn create_template_config(path: &Path) -> Result<()> {
    if path_has_symlink_ancestor(path)? {
        bail!("Refusing to create config: ancestor of {} is a symlink", path.display());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error_with_help("create config dir", parent))?;
        let _ = set_mode(parent, 0o700);
    }

    let content = format!(
        "<!--\n  tier_move configuration (XML)\n\n  Settings:\n    log_level         -> quiet | normal | info | debug\n    log_file          -> path to log file (optional; stderr still used)\n    dry_run           -> true to plan without touching any file\n    workers           -> threads for scanning and planning (0 = CPU count)\n    usage_refresh_ms  -> how long a free-space probe stays fresh\n    inuse_refresh_ms  -> how long the open-file scan stays fresh\n    state_dir         -> where the run lock is kept\n\n  Storage:\n    <disk name=\"disk1\" path=\"/mnt/disk1\"/>   array member, an allocation candidate\n    <pool name=\"cache\" path=\"/mnt/cache\"/>   cache tier, a fixed destination\n\n  Shares:\n    use_cache    -> yes (pool to array) | prefer (array to pool) | no | only\n    cache_pool   -> pool the share caches on; cache_pool2 enables pool to pool moves\n    allocator    -> highwater | mostfree | fillup\n    split_level  -> keep directories at this depth together (-1 disables)\n    floor        -> free space to leave on a disk, e.g. 20G\n    include, exclude -> comma separated disk names\n    cow          -> auto | no (mark new files NOCOW)\n\n  CLI flags override these values.\n-->\n<config>\n  <log_level>normal</log_level>\n  <log_file>{}</log_file>\n  <dry_run>true</dry_run>\n  <disk name=\"disk1\" path=\"/mnt/disk1\"/>\n  <disk name=\"disk2\" path=\"/mnt/disk2\"/>\n  <pool name=\"cache\" path=\"/mnt/cache\"/>\n  <share name=\"media\" use_cache=\"yes\" cache_pool=\"cache\" allocator=\"highwater\" split_level=\"1\" floor=\"20G\"/>\n</config>\n",
        default_log_path().display(),
    );

    write_private_atomic(path, content.as_bytes())?;

    info!("Created template config at {}", path.display());
    Ok(())
}
