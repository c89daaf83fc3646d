//! Structured logging setup with two modes: a production mode writing
//! rotated JSON files plus a human console layer, and a CLI mode writing
//! plain text to stderr only.

use std::path::Path;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Holds the non-blocking writer guard; must be kept alive for the process
/// lifetime or buffered log lines are dropped on exit.
pub struct LoggingGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Initialize logging for the long-running daemon: JSON lines rotated
/// daily under `logs_dir`, plus a human-readable layer on stderr.
///
/// # Errors
///
/// Returns an error if `logs_dir` cannot be created.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create log directory: {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "teleforge.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking);

    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    Registry::default()
        .with(filter)
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(LoggingGuard {
        _file_guard: guard,
    })
}

/// Initialize a simple stderr-only subscriber, for one-shot CLI
/// invocations (e.g. a future `check` subcommand) that should not rotate
/// log files.
pub fn init_cli() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
