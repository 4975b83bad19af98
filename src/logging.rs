//! Tracing initialization.
//! Builds a subscriber with an EnvFilter, compact or JSON formatting on stderr,
//! and an optional non-blocking file layer.
//!
//! Behavior:
//! - Level comes from LogLevel; `RUST_LOG` may narrow it per target.
//! - File logging is refused when any ancestor of the file path is a symlink.

use anyhow::Result;
use chrono::Local;
use std::fmt as stdfmt;
use std::path::Path;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::Layer;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt as tsfmt;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use tier_move::config::{LogLevel, default_log_path, path_has_symlink_ancestor};
use tier_move::output as out;
use tier_move::platform::open_private_append;

/// Human-friendly timestamp formatter (DD/MM/YY HH:MM:SS)
struct LocalHumanTime;
impl FormatTime for LocalHumanTime {
    fn format_time(&self, w: &mut tsfmt::format::Writer<'_>) -> stdfmt::Result {
        write!(w, "{}", Local::now().format("%d/%m/%y %H:%M:%S"))
    }
}

fn to_level_filter(lvl: LogLevel) -> LevelFilter {
    match lvl {
        LogLevel::Quiet => LevelFilter::ERROR,
        LogLevel::Normal => LevelFilter::INFO,
        LogLevel::Info => LevelFilter::DEBUG,
        LogLevel::Debug => LevelFilter::TRACE,
    }
}

/// Base directive from the level; `RUST_LOG` directives are appended when set.
fn build_env_filter(level: LevelFilter) -> EnvFilter {
    let mut filter = EnvFilter::default().add_directive(level.into());
    if let Ok(extra) = std::env::var("RUST_LOG") {
        for directive in extra.split(',').filter(|d| !d.trim().is_empty()) {
            match directive.trim().parse() {
                Ok(d) => filter = filter.add_directive(d),
                Err(e) => eprintln!("ignoring RUST_LOG directive '{directive}': {e}"),
            }
        }
    }
    filter
}

/// One formatting layer over `writer`, JSON or compact.
fn fmt_layer<S, W>(writer: W, json: bool, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = tsfmt::layer()
        .with_writer(writer)
        .with_timer(LocalHumanTime)
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_ansi(ansi);
    if json {
        base.json().boxed()
    } else {
        base.compact().boxed()
    }
}

/// Open a non-blocking appender for `path`, or explain on stderr why not.
fn open_file_writer(path: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    match path_has_symlink_ancestor(path) {
        Ok(false) => {}
        Ok(true) => {
            eprintln!(
                "Refusing to enable file logging: ancestor of {} is a symlink",
                path.display()
            );
            return None;
        }
        Err(e) => {
            eprintln!("Error checking log path {} for symlinks: {e}", path.display());
            return None;
        }
    }
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match open_private_append(path) {
        Ok(file) => Some(tracing_appender::non_blocking(file)),
        Err(e) => {
            eprintln!("Failed to open log file {}: {e}", path.display());
            None
        }
    }
}

/// Install the global subscriber. The returned guard flushes the file layer on
/// drop and must be held until shutdown.
pub fn init_tracing(lvl: LogLevel, log_file: Option<&Path>, json: bool) -> Result<Option<WorkerGuard>> {
    let filter = build_env_filter(to_level_filter(lvl));
    let stderr_ansi = atty::is(atty::Stream::Stderr) && !json;

    let mut guard = None;
    let file_layer = log_file.and_then(|path| match open_file_writer(path) {
        Some((writer, g)) => {
            guard = Some(g);
            Some(fmt_layer(writer, json, false))
        }
        None => {
            out::print_warn(&format!(
                "file logging to '{}' was not enabled; logs continue on stderr",
                path.display()
            ));
            out::print_info(&format!("default log path: {}", default_log_path().display()));
            None
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(std::io::stderr, json, stderr_ansi))
        .with(file_layer)
        .try_init()?;
    Ok(guard)
}
