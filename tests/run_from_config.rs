use assert_fs::TempDir;
use assert_fs::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tier_move::inuse::{FixedInUse, NeverInUse};
use tier_move::usage::StaticUsage;
use tier_move::{CancelToken, Config, Pipeline, config::parse_config_xml};

const G: u64 = 1 << 30;

fn config_xml(root: &Path) -> String {
    format!(
        r#"<config>
  <log_level>quiet</log_level>
  <state_dir>{root}/state</state_dir>
  <disk name="disk1" path="{root}/disk1"/>
  <disk name="disk2" path="{root}/disk2"/>
  <pool name="cache" path="{root}/cache"/>
  <share name="media" use_cache="yes" cache_pool="cache" allocator="mostfree" floor="1G"/>
  <share name="appdata" use_cache="prefer" cache_pool="cache"/>
  <share name="archive" use_cache="no"/>
</config>"#,
        root = root.display()
    )
}

fn setup() -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    for d in ["disk1", "disk2", "cache"] {
        tmp.child(d).create_dir_all().unwrap();
    }
    let cfg = parse_config_xml(&config_xml(tmp.path())).unwrap();
    cfg.validate().unwrap();
    (tmp, cfg)
}

fn usage(root: &Path) -> Arc<StaticUsage> {
    Arc::new(
        StaticUsage::new()
            .with(root.join("disk1"), 100 * G, 10 * G)
            .with(root.join("disk2"), 100 * G, 60 * G)
            .with(root.join("cache"), 100 * G, 50 * G),
    )
}

fn pipeline(cfg: &Config, root: &Path) -> Pipeline {
    Pipeline::new(Arc::new(cfg.inventory.clone()), usage(root), Arc::new(NeverInUse), CancelToken::new())
        .with_workers(2)
}

#[test]
fn shares_move_in_their_configured_direction() {
    let (tmp, cfg) = setup();
    tmp.child("cache/media/movies/film.mkv").write_str("film").unwrap();
    tmp.child("disk1/appdata/db/state.sqlite").write_str("rows").unwrap();
    tmp.child("cache/archive/keep.tar").write_str("stay").unwrap();

    let summary = pipeline(&cfg, tmp.path()).run(&cfg.selected_shares()).unwrap();

    assert_eq!(summary.moved(), 2);
    assert_eq!(summary.skipped(), 0);
    assert_eq!(summary.bytes_moved, 8);
    tmp.child("disk2/media/movies/film.mkv").assert("film");
    tmp.child("cache/appdata/db/state.sqlite").assert("rows");
    tmp.child("cache/archive/keep.tar").assert("stay");
    assert!(!tmp.child("cache/media/movies").path().exists());
    assert!(!tmp.child("disk1/appdata/db").path().exists());
}

#[test]
fn share_filter_limits_the_run() {
    let (tmp, mut cfg) = setup();
    tmp.child("cache/media/a.bin").write_str("a").unwrap();
    tmp.child("disk2/appdata/b.bin").write_str("b").unwrap();
    cfg.only_shares = vec!["appdata".into()];
    cfg.validate().unwrap();

    let summary = pipeline(&cfg, tmp.path()).run(&cfg.selected_shares()).unwrap();

    assert_eq!(summary.shares, vec!["appdata"]);
    assert_eq!(summary.moved(), 1);
    tmp.child("cache/media/a.bin").assert("a");
    tmp.child("cache/appdata/b.bin").assert("b");
}

#[test]
fn open_files_stay_behind() {
    let (tmp, cfg) = setup();
    tmp.child("cache/media/busy.bin").write_str("busy").unwrap();
    tmp.child("cache/media/idle.bin").write_str("idle").unwrap();
    let busy = tmp.child("cache/media/busy.bin").path().to_path_buf();

    let p = Pipeline::new(
        Arc::new(cfg.inventory.clone()),
        usage(tmp.path()),
        Arc::new(FixedInUse([busy.clone()].into_iter().collect())),
        CancelToken::new(),
    );
    let summary = p.run(&cfg.selected_shares()).unwrap();

    assert_eq!(summary.moved(), 1);
    assert_eq!(summary.skipped(), 1);
    assert_eq!(fs::read(&busy).unwrap(), b"busy");
    tmp.child("disk2/media/idle.bin").assert("idle");
}

#[test]
fn summary_serializes_for_reporting() {
    let (tmp, cfg) = setup();
    tmp.child("cache/media/x.bin").write_str("xyz").unwrap();

    let summary = pipeline(&cfg, tmp.path()).with_dry_run(true).run(&cfg.selected_shares()).unwrap();
    let json = serde_json::to_value(&summary).unwrap();

    assert_eq!(json["dry_run"], true);
    assert_eq!(json["planned"], 1);
    assert_eq!(json["buckets"][0]["destination"], "disk2");
    assert!(json["io"]["elapsed"].is_number());
    tmp.child("cache/media/x.bin").assert("xyz");
    assert!(!tmp.child("disk2/media/x.bin").path().exists());
}
