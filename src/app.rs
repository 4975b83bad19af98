//! Application orchestrator.
//! Loads the config, applies CLI overrides, initializes logging, installs the
//! interrupt handler, takes the run lock and drives one pipeline run.

use anyhow::{Context, Result, bail};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use tier_move::cli::Args;
use tier_move::config::{
    CONFIG_ENV, Config, LoadResult, default_config_path, load_config_from_xml_path, load_or_init,
};
use tier_move::fs_ops::try_acquire_run_lock;
use tier_move::output as out;
use tier_move::{CancelToken, Pipeline, TierMoveError};

use crate::logging::init_tracing;

/// Run the CLI application.
pub fn run(args: Args) -> Result<()> {
    // Handle --print-config before logging init
    if args.print_config {
        print_config_location(&args);
        return Ok(());
    }

    let mut cfg = match load_config(&args)? {
        Some(cfg) => cfg,
        None => return Ok(()),
    };
    args.apply_overrides(&mut cfg);

    let guard = init_tracing(cfg.log_level, cfg.log_file.as_deref(), args.json).map_err(|e| {
        out::print_error(&format!("Failed to initialize logging: {e}"));
        e
    })?;

    // The guard is dropped on interrupt so buffered file logs are flushed.
    let guard_slot = Arc::new(Mutex::new(guard));
    let cancel = CancelToken::new();
    {
        let guard_slot = Arc::clone(&guard_slot);
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            if cancel.is_canceled() {
                return;
            }
            cancel.cancel();
            out::print_warn("Received interrupt; finishing in-flight work and shutting down...");
            if let Ok(mut g) = guard_slot.lock() {
                let _ = g.take();
            }
        })
        .expect("failed to install signal handler");
    }

    debug!(?args, "starting tier_move");
    let result = run_with_config(&cfg, cancel);

    if let Ok(mut g) = guard_slot.lock() {
        let _ = g.take();
    }
    result
}

fn print_config_location(args: &Args) {
    if let Some(p) = &args.config {
        out::print_info(&format!("Using --config (explicit):\n  {}\n", p.display()));
        return;
    }
    if let Ok(cfg_env) = std::env::var(CONFIG_ENV) {
        out::print_info(&format!("Using {CONFIG_ENV} (explicit):\n  {cfg_env}\n"));
        out::print_info(&format!("To override, unset {CONFIG_ENV} or set it to another file."));
        return;
    }
    match default_config_path() {
        Ok(p) => {
            out::print_info(&format!("Default tier_move config path:\n  {}\n", p.display()));
            if p.exists() {
                out::print_info("A config file already exists at that location.");
            } else {
                out::print_info("No config file exists there yet. Run without --print-config to create a template.");
            }
        }
        Err(e) => out::print_error(&format!("Could not determine a default config path: {e}")),
    }
}

/// `None` when a template was just written and the run should stop.
fn load_config(args: &Args) -> Result<Option<Config>> {
    if let Some(path) = &args.config {
        return load_config_from_xml_path(path)
            .with_context(|| format!("loading config {}", path.display()))
            .map(Some);
    }
    match load_or_init()? {
        LoadResult::Loaded(cfg, path) => {
            debug!(path = %path.display(), "config loaded");
            Ok(Some(*cfg))
        }
        LoadResult::CreatedTemplate(path) => {
            out::print_success(&format!("A template tier_move config was written to: {}", path.display()));
            out::print_info(
                "Edit the <disk>, <pool> and <share> entries to match your storage, then set dry_run to false.",
            );
            out::print_info(&format!("Then re-run this command. To use a different location set {CONFIG_ENV}."));
            Ok(None)
        }
    }
}

fn run_with_config(cfg: &Config, cancel: CancelToken) -> Result<()> {
    cfg.validate()?;

    std::fs::create_dir_all(&cfg.state_dir)
        .with_context(|| format!("creating state directory {}", cfg.state_dir.display()))?;
    let Some(_lock) = try_acquire_run_lock(&cfg.state_dir)
        .with_context(|| format!("locking state directory {}", cfg.state_dir.display()))?
    else {
        error!(state_dir = %cfg.state_dir.display(), "another tier_move run holds the lock");
        bail!("another tier_move run is active (lock in {})", cfg.state_dir.display());
    };

    let shares = cfg.selected_shares();
    let pipeline = Pipeline::from_config(cfg, cancel);
    match pipeline.run(&shares) {
        Ok(summary) => {
            out::print_summary(&summary);
            info!(
                moved = summary.moved(),
                skipped = summary.skipped(),
                bytes = summary.bytes_moved,
                "tier_move finished"
            );
            Ok(())
        }
        Err(e) => {
            log_run_error(&e);
            Err(e.into())
        }
    }
}

fn log_run_error(e: &TierMoveError) {
    let code = e.code();
    let kind = e.kind();
    match e {
        TierMoveError::Canceled => error!(code, kind, "run aborted by user"),
        TierMoveError::Config(msg) => error!(code, kind, %msg, "run refused by configuration"),
        TierMoveError::NoAllocationMethod { share, method } => {
            error!(code, kind, %share, ?method, "share has no usable allocation method")
        }
        TierMoveError::Io { path, source, .. } => {
            error!(code, kind, path = %path.display(), error = %source, "run failed")
        }
        other => error!(code, kind, error = %other, "run failed"),
    }
}
