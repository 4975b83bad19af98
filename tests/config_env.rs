use serial_test::serial;
use std::fs;
use tempfile::tempdir;

use tier_move::config::{CONFIG_ENV, LoadResult, default_config_path, load_config_from_xml_path, load_or_init};
use tier_move::{LogLevel, MoveDirection};

struct EnvGuard;

impl EnvGuard {
    fn set(value: &std::path::Path) -> Self {
        unsafe { std::env::set_var(CONFIG_ENV, value) };
        EnvGuard
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        unsafe { std::env::remove_var(CONFIG_ENV) };
    }
}

#[test]
#[serial]
fn env_override_is_loaded() {
    let td = tempdir().unwrap();
    let base = fs::canonicalize(td.path()).unwrap();
    fs::create_dir_all(base.join("disk1")).unwrap();
    fs::create_dir_all(base.join("cache")).unwrap();
    let cfg_path = base.join("custom.xml");
    fs::write(
        &cfg_path,
        format!(
            r#"<config>
  <log_level>info</log_level>
  <disk name="disk1" path="{0}/disk1"/>
  <pool name="cache" path="{0}/cache"/>
  <share name="media" use_cache="yes" cache_pool="cache" allocator="fillup"/>
</config>"#,
            base.display()
        ),
    )
    .unwrap();

    let _env = EnvGuard::set(&cfg_path);
    assert_eq!(default_config_path().unwrap(), cfg_path);

    let LoadResult::Loaded(cfg, path) = load_or_init().unwrap() else {
        panic!("expected an existing config to load");
    };
    assert_eq!(path, cfg_path);
    assert_eq!(cfg.log_level, LogLevel::Info);
    assert_eq!(
        cfg.inventory.share("media").unwrap().direction(),
        Some(MoveDirection::PoolToArray { pool: "cache".into() })
    );
    cfg.validate().unwrap();
}

#[test]
#[serial]
fn missing_env_config_is_an_error_not_a_template() {
    let td = tempdir().unwrap();
    let cfg_path = td.path().join("absent.xml");
    let _env = EnvGuard::set(&cfg_path);

    let err = load_or_init().unwrap_err().to_string();
    assert!(err.contains(CONFIG_ENV), "{err}");
    assert!(!cfg_path.exists());
}

#[test]
#[serial]
fn relative_env_path_resolves_against_cwd() {
    let _env = EnvGuard::set(std::path::Path::new("conf/tier.xml"));
    let expected = std::env::current_dir().unwrap().join("conf/tier.xml");
    assert_eq!(default_config_path().unwrap(), expected);
}

#[test]
fn malformed_xml_names_the_file() {
    let td = tempdir().unwrap();
    let p = td.path().join("bad.xml");
    fs::write(&p, "<config><disk name=\"d\"></config>").unwrap();
    let err = format!("{:#}", load_config_from_xml_path(&p).unwrap_err());
    assert!(err.contains("bad.xml"), "{err}");
}
