//! Tracing setup for both entry points.
//!
//! `serve` logs to the console and to a daily rolling file; `run` logs to the
//! console (captured by the queue into the job log) and to a fixed
//! `runtime.log` inside the run's artifact directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::utils::fs;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "minutes=info,tower_http=info";

/// File name prefix of the service's rolling log.
pub const SERVICE_LOG_PREFIX: &str = "minutes.log";

/// Rolling service logs older than this are deleted.
const LOG_RETENTION_DAYS: i64 = 7;

/// Timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Where the file layer writes.
#[derive(Debug, Clone)]
pub enum LogOutput {
    /// `<dir>/minutes.log.YYYY-MM-DD`, rotated daily.
    Daily(PathBuf),
    /// One fixed file, appended to.
    File(PathBuf),
}

impl LogOutput {
    fn directory(&self) -> Option<&Path> {
        match self {
            Self::Daily(dir) => Some(dir),
            Self::File(path) => path.parent(),
        }
    }
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered lines are lost.
///
/// `directive` overrides `RUST_LOG`, which overrides [`DEFAULT_LOG_FILTER`].
pub fn init_logging(output: &LogOutput, directive: Option<&str>, ansi: bool) -> crate::Result<WorkerGuard> {
    if let Some(dir) = output.directory().filter(|d| !d.as_os_str().is_empty()) {
        fs::ensure_dir_all_sync_with_op("creating log directory", dir)?;
    }

    let appender = match output {
        LogOutput::Daily(dir) => tracing_appender::rolling::daily(dir, SERVICE_LOG_PREFIX),
        LogOutput::File(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path.file_name().unwrap_or_else(|| "runtime.log".as_ref());
            tracing_appender::rolling::never(dir, name)
        }
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let filter = match directive {
        Some(directive) => EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::config(format!("invalid log filter '{directive}': {e}")))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .with_timer(LocalTimer),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    Ok(guard)
}

/// Delete rolling service logs older than the retention window once a day.
pub fn start_retention_cleanup(log_dir: Arc<PathBuf>, cancel_token: CancellationToken) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(24 * 60 * 60);
        loop {
            if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                warn!(error = %e, "Failed to clean up old logs");
            }
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Log retention cleanup task shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    });
}

/// Delete `minutes.log.YYYY-MM-DD` files dated before the cutoff.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();
    let prefix = format!("{SERVICE_LOG_PREFIX}.");

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(&prefix))
            .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };
        if date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }
    if deleted > 0 {
        info!(count = deleted, "Cleaned up old log files");
    }
    Ok(deleted)
}
