use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

pub const FILTER_ENV: &str = "NAGRIS_LOG";
const LOG_FILE_PREFIX: &str = "nagris-tui.log";

/// Directory the daily log files go to.
pub fn log_dir(config: &LogConfig) -> PathBuf {
    config
        .dir
        .clone()
        .or_else(|| dirs::cache_dir().map(|dir| dir.join("nagris").join("logs")))
        .unwrap_or_else(|| std::env::temp_dir().join("nagris-logs"))
}

/// `NAGRIS_LOG` wins over the configured level.
pub fn filter_directive(config: &LogConfig) -> String {
    std::env::var(FILTER_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| config.level.clone())
}

/// Routes `tracing` output to a daily rolling file; the terminal belongs to
/// the UI. Keep the returned guard alive until exit so buffered lines flush.
pub fn init(config: &LogConfig) -> Result<WorkerGuard> {
    let dir = log_dir(config);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let directive = filter_directive(config);
    let filter = EnvFilter::try_new(&directive)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("build log filter")?;

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(filter)
        .with_ansi(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
        .context("install tracing subscriber")?;

    tracing::info!(version = crate::VERSION, dir = %dir.display(), "logging started");
    Ok(guard)
}
