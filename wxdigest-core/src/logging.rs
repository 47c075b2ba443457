//! Diagnostic log for digest runs.
//!
//! A run prints only its summary lines and a spinner to the terminal. Store
//! probing, filter counts, the prompt hash and provider failures go to
//! `$XDG_STATE_HOME/wxdigest/wxdigest.log` instead, one file per day, so a
//! failed or odd digest can be traced after the fact without touching stdout.

use crate::config::{Config, LoggingConfig};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Install the file subscriber for a CLI run.
///
/// The level comes from `[logging] level`; `RUST_LOG` wins when set, which is
/// the quickest way to see schema-variant probing (`RUST_LOG=wxdigest_core=debug`).
/// Hold the returned guard until the run ends or buffered lines are lost.
pub fn init(config: &LoggingConfig) -> crate::error::Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "wxdigest.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init();

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Route events to the test harness output; safe to call from every test.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Owns the non-blocking writer thread; dropping it flushes the log file.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Where today's run log lives, shown in error hints.
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}
