//! Logging setup
//!
//! - Human-readable console output on stderr, keeping stdout for results
//! - Optional JSON log files with size-based and daily rotation

use anyhow::{Context, Result};
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tycoon_core::config::LogConfig;

/// Install the global subscriber.
///
/// Returns the file writer guard when file logging is enabled; it must be
/// kept alive until exit so buffered lines are flushed.
pub fn init_telemetry(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            let log_dir = Path::new(dir);
            std::fs::create_dir_all(log_dir)
                .with_context(|| format!("failed to create log directory {}", dir))?;

            // tycoon.log.YYYY-MM-DD, rotated daily or at max_file_bytes
            let file_appender = RollingFileAppender::new(
                log_dir.join("tycoon.log"),
                RollingConditionBasic::new()
                    .daily()
                    .max_size(config.max_file_bytes),
                config.max_files,
            )?;
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

            let layer = fmt::layer()
                .json()
                .with_writer(non_blocking_file)
                .with_current_span(true)
                .with_target(true)
                .with_thread_ids(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    if let Some(dir) = &config.dir {
        tracing::debug!(
            "File logging to {} ({} bytes per file, {} files)",
            dir,
            config.max_file_bytes,
            config.max_files
        );
    }

    Ok(guard)
}
