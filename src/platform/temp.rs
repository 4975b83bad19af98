//! Unique sibling names for atomic writes.
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Suffix of in-flight copy targets; the walker and the reconciler key off it.
pub const PARTIAL_SUFFIX: &str = ".tier_move.partial";

/// Bytes of the original name kept in a partial name. The dot prefix and the
/// unique tail add at most 91 bytes, which keeps the result within NAME_MAX (255).
const PARTIAL_STEM_MAX: usize = 160;

fn stamp() -> (u32, u128, u64) {
    let pid = std::process::id();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    (pid, nanos, COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Hidden sibling temp name for config atomic writes.
/// Pattern: .tier_move.config.tmp.<pid>.<nanos>.<seq>
pub fn tmp_config_sibling_name(target: &Path) -> PathBuf {
    let (pid, nanos, seq) = stamp();
    let name = format!(".tier_move.config.tmp.{pid}.{nanos}.{seq}");
    target.parent().unwrap_or_else(|| Path::new(".")).join(name)
}

/// Leading bytes of `name`, cut on a char boundary when the name is UTF-8.
fn partial_stem(name: &OsStr) -> &OsStr {
    let bytes = name.as_bytes();
    if bytes.len() <= PARTIAL_STEM_MAX {
        return name;
    }
    let mut cut = PARTIAL_STEM_MAX;
    if let Ok(s) = std::str::from_utf8(bytes) {
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
    }
    OsStr::from_bytes(&bytes[..cut])
}

/// Hidden sibling of `dest` used while its content is being copied.
/// Pattern: .<file name, capped>.<pid>.<nanos>.<seq>.tier_move.partial
/// Preserves non-UTF8 names.
pub fn partial_sibling_name(dest: &Path) -> PathBuf {
    let (pid, nanos, seq) = stamp();
    let mut name = OsString::from(".");
    name.push(partial_stem(dest.file_name().unwrap_or_else(|| OsStr::new("file"))));
    name.push(format!(".{pid}.{nanos}.{seq}{PARTIAL_SUFFIX}"));
    dest.with_file_name(name)
}

/// Whether a file name looks like one of our in-flight copy targets.
pub fn is_partial_name(name: &OsStr) -> bool {
    let s = name.to_string_lossy();
    s.starts_with('.') && s.ends_with(PARTIAL_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn uniqueness_concurrent() {
        let target = Path::new("/mnt/disk1/share/movie.mkv");
        let mut handles = Vec::new();
        for _ in 0..32 {
            let t = target.to_path_buf();
            handles.push(thread::spawn(move || partial_sibling_name(&t)));
        }
        let mut set = HashSet::new();
        for h in handles {
            let p = h.join().unwrap();
            assert_eq!(p.parent(), target.parent());
            assert!(is_partial_name(p.file_name().unwrap()));
            assert!(set.insert(p));
        }
        assert_eq!(set.len(), 32);
    }

    #[test]
    fn long_names_fit_name_max() {
        for stem in ["a".repeat(255), format!("a{}", "é".repeat(127)), "x".repeat(PARTIAL_STEM_MAX)] {
            let p = partial_sibling_name(&Path::new("/mnt/disk1/media").join(&stem));
            let name = p.file_name().unwrap();
            assert!(name.len() <= 255, "{} bytes", name.len());
            assert!(name.to_str().is_some());
            assert!(is_partial_name(name));
        }
        let short = partial_sibling_name(Path::new("/d/movie.mkv"));
        assert!(short.file_name().unwrap().to_str().unwrap().starts_with(".movie.mkv."));
    }

    #[test]
    fn ordinary_names_are_not_partial() {
        assert!(!is_partial_name(OsStr::new("movie.mkv")));
        assert!(!is_partial_name(OsStr::new("notes.partial")));
    }
}
