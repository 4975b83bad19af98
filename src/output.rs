//! User-facing terminal lines.
//! Prefixes are colored only when the target stream is a TTY; scripted callers
//! get plain `label: message` text.

use owo_colors::{OwoColorize, Style};

use crate::pipeline::RunSummary;

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn emit(stream: Stream, label: &str, style: Style, msg: &str) {
    let tty = match stream {
        Stream::Stdout => atty::is(atty::Stream::Stdout),
        Stream::Stderr => atty::is(atty::Stream::Stderr),
    };
    let prefix = if tty {
        format!("{}", label.style(style))
    } else {
        label.to_string()
    };
    match stream {
        Stream::Stdout => println!("{prefix} {msg}"),
        Stream::Stderr => eprintln!("{prefix} {msg}"),
    }
}

pub fn print_info(msg: &str) {
    emit(Stream::Stdout, "info:", Style::new().cyan().bold(), msg);
}

pub fn print_warn(msg: &str) {
    emit(Stream::Stderr, "warn:", Style::new().yellow().bold(), msg);
}

pub fn print_error(msg: &str) {
    emit(Stream::Stderr, "error:", Style::new().red().bold(), msg);
}

pub fn print_success(msg: &str) {
    emit(Stream::Stdout, "ok:", Style::new().green().bold(), msg);
}

/// Unprefixed stdout line for output users may script against.
pub fn print_user(msg: &str) {
    println!("{msg}");
}

/// Bytes in the largest binary unit that keeps the value at or above 1.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Human-readable run summary, one line per destination.
pub fn summary_lines(s: &RunSummary) -> Vec<String> {
    let verb = if s.dry_run { "would move" } else { "moved" };
    let mut lines = vec![format!(
        "{} {} of {} item(s), {} ({} skipped) in {:.1}s",
        verb,
        s.moved(),
        s.discovered,
        human_bytes(s.bytes_moved),
        s.skipped(),
        s.io.elapsed.as_secs_f64() + s.evaluate.elapsed.as_secs_f64() + s.enumerate.elapsed.as_secs_f64(),
    )];
    for b in &s.buckets {
        lines.push(format!(
            "  {:<12} {:>6} {verb}, {:>4} skipped, {:>10}, {}/s",
            b.destination,
            b.moved,
            b.skipped,
            human_bytes(b.bytes),
            human_bytes(b.progress.throughput() as u64),
        ));
    }
    if s.reconciled_partials > 0 {
        lines.push(format!("  removed {} orphaned partial copies", s.reconciled_partials));
    }
    lines
}

pub fn print_summary(s: &RunSummary) {
    let mut lines = summary_lines(s).into_iter();
    if let Some(head) = lines.next() {
        if s.skipped() > 0 {
            print_warn(&head);
        } else {
            print_success(&head);
        }
    }
    for line in lines {
        print_user(&line);
    }
}
