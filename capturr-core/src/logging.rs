//! Log setup for the capturr binary
//!
//! Everything goes to a daily rolling file under the XDG state directory
//! (`~/.local/state/capturr/capturr.log.YYYY-MM-DD`). The long-running `run`
//! command also mirrors events to stderr so sync progress is visible.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Target of the sync orchestrator's events
const SYNC_TARGET: &str = "capturr_core::sync";

/// HTTP stack internals are noisy at debug and below
const QUIET_DEPENDENCIES: &[&str] = &["hyper=warn", "reqwest=warn", "rustls=warn"];

/// Where log events are written besides the log file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Log file only (one-shot commands whose stdout is the UI)
    File,
    /// Log file plus a compact stderr stream
    FileAndStderr,
}

/// Filter directives for a logging config, ignoring `RUST_LOG`.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = vec![config.level.clone()];
    directives.extend(QUIET_DEPENDENCIES.iter().map(|d| d.to_string()));
    if let Some(level) = &config.sync_level {
        directives.push(format!("{}={}", SYNC_TARGET, level));
    }
    directives.join(",")
}

/// `RUST_LOG` wins over the config file when it is set and valid.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(filter_directives(config))
        .map_err(|e| Error::Config(format!("invalid log level: {}", e)))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the background writer.
pub fn init(config: &LoggingConfig, output: Output) -> Result<LoggingGuard> {
    let filter = build_filter(config)?;

    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("capturr.log")
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to create log file: {}", e)))?;

    // Sends must not block on log I/O
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true);

    let stderr_layer = (output == Output::FileAndStderr).then(|| {
        fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        sync_level = config.sync_level.as_deref().unwrap_or("-"),
        ?output,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Flushes pending log writes when dropped.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}
