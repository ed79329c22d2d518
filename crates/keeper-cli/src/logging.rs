use std::path::Path;

use anyhow::Result;
use keeper_core::{LogFormat, LoggingConfig};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_ENV: &str = "AGENT_KEEPER_LOG";
const DEFAULT_DIRECTIVE: &str = "info";
const LOG_FILE_NAME: &str = "agent-keeper.log";

/// `AGENT_KEEPER_LOG` wins over `RUST_LOG`; empty values are ignored.
pub fn filter_directive(keeper_log: Option<String>, rust_log: Option<String>) -> String {
    keeper_log
        .filter(|value| !value.trim().is_empty())
        .or_else(|| rust_log.filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string())
}

/// Installs the global subscriber: human or JSON lines on stderr, plus a
/// daily JSON log file when enabled. The returned guard flushes the file
/// writer and must live as long as the process.
pub fn init_logging(
    config: &LoggingConfig,
    format: LogFormat,
    log_dir: &Path,
) -> Result<Option<WorkerGuard>> {
    let directive = filter_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("invalid log directive '{directive}' ({err}); defaulting to {DEFAULT_DIRECTIVE}");
        EnvFilter::new(DEFAULT_DIRECTIVE)
    });

    let console_layer = match format {
        LogFormat::Json => fmt::layer()
            .with_target(false)
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let mut guard = None;
    let mut file_error = None;
    let file_layer = if config.file {
        match std::fs::create_dir_all(log_dir) {
            Ok(()) => {
                let (writer, file_guard) = tracing_appender::non_blocking(daily(log_dir, LOG_FILE_NAME));
                guard = Some(file_guard);
                Some(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .json()
                        .with_writer(writer)
                        .boxed(),
                )
            }
            Err(err) => {
                file_error = Some(err);
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    match file_error {
        Some(err) => tracing::warn!(
            log_dir = %log_dir.display(),
            error = %err,
            "file logging disabled; could not create log directory"
        ),
        None => info!(log_dir = %log_dir.display(), format = ?format, file = guard.is_some(), "logging initialised"),
    }
    Ok(guard)
}
