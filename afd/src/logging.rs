//! Daemon logging.
//!
//! Structured `tracing` output for the supervisor and its tasks:
//! - Writes to `<work dir>/log/DAEMON_LOG`
//! - Also prints to stdout when running in the foreground
//! - Configurable via the RUST_LOG environment variable
//!
//! This is the daemon's own diagnostics channel; the operator-facing
//! SYSTEM/OUTPUT/INPUT/DELETE logs with their fixed line formats live
//! in [`crate::logsink`].

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name of the daemon's tracing output inside the log directory.
pub const DAEMON_LOG: &str = "DAEMON_LOG";

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard will flush and close the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize the daemon logging system.
///
/// Creates the log directory if needed and sets up output to file,
/// plus stdout when running in the foreground. Unlike the operator
/// logs this file is not rotated by us; it appends across restarts.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn init_logging(log_dir: &Path, foreground: bool) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, DAEMON_LOG);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if foreground {
        let stdout_layer = tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .with_ansi(true)
            .with_target(false);
        registry.with(stdout_layer).init();
    } else {
        registry.init();
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
