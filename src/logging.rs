//! Tracing setup shared by the `iconsketch` binaries.
//!
//! Events go to stderr and to one log file per launch under the app root.
//! Only `iconsketch_*.log` files are pruned, oldest first.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs::{self, AppDirError};

/// Filter directives for iconsketch, checked before `RUST_LOG`.
pub const LOG_ENV: &str = "ICONSKETCH_LOG";
const DEFAULT_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "iconsketch_";
const KEPT_LOG_FILES: usize = 10;

const FILE_NAME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
const LINE_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

static FILE_WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error(transparent)]
    AppDir(#[from] AppDirError),
    #[error("{context} ({path}): {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to format log file time: {0}")]
    FormatTime(#[from] time::error::Format),
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

impl LoggingError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Install the global subscriber and return this launch's log file.
///
/// Later calls are no-ops and return `Ok(None)`. On error nothing is
/// installed and the caller keeps running without logs.
pub fn init() -> Result<Option<PathBuf>, LoggingError> {
    if FILE_WRITER_GUARD.get().is_some() {
        return Ok(None);
    }
    let dir = app_dirs::logs_dir()?;
    let name = log_file_name(launch_time())?;
    let path = dir.join(&name);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| LoggingError::io("Failed to create log file", &path, source))?;
    for stale in stale_logs(&dir, KEPT_LOG_FILES)? {
        fs::remove_file(&stale)
            .map_err(|source| LoggingError::io("Failed to remove old log file", &stale, source))?;
    }

    let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, &name));
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = fmt::time::OffsetTime::new(offset, LINE_TIME_FORMAT);
    // stdout is reserved for command output.
    let stderr_layer = fmt::layer()
        .with_timer(timer.clone())
        .with_target(false)
        .with_writer(std::io::stderr);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(file_writer);
    let subscriber = Registry::default()
        .with(env_filter(std::env::var(LOG_ENV).ok().as_deref()))
        .with(stderr_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = FILE_WRITER_GUARD.set(guard);

    tracing::info!("Logging to {}", path.display());
    Ok(Some(path))
}

/// `directives` win when they parse; otherwise `RUST_LOG`, then `info`.
fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

fn launch_time() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn log_file_name(at: OffsetDateTime) -> Result<String, LoggingError> {
    Ok(format!("{LOG_FILE_PREFIX}{}.log", at.format(FILE_NAME_FORMAT)?))
}

fn is_own_log(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "log")
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
}

/// Own log files beyond the newest `keep`, oldest first.
fn stale_logs(dir: &Path, keep: usize) -> Result<Vec<PathBuf>, LoggingError> {
    let entries = fs::read_dir(dir)
        .map_err(|source| LoggingError::io("Failed to read log directory", dir, source))?;
    let mut logs: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_own_log(path))
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();
    logs.sort();
    let stale = logs.len().saturating_sub(keep);
    Ok(logs.into_iter().take(stale).map(|(_, path)| path).collect())
}
