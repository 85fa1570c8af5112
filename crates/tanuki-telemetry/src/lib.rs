//! Tracing setup for tanuki binaries.
//!
//! Two sinks:
//!
//! - human-readable output on stderr, filtered by `RUST_LOG` (default `info`)
//! - an optional JSON-lines event log, one record per event emitted by the
//!   session engine (connections, credentials, transcript entries, closes).
//!   Each record carries the enclosing `session` span, so the session id and
//!   peer address ride along without being repeated at every call site.
//!
//! ```bash
//! # Verbose console, events appended to /var/log/tanuki/events.jsonl
//! RUST_LOG=debug tanuki --tcp --log-file /var/log/tanuki/events.jsonl
//! ```
//!
//! Libraries never call [`init`]; only the binary does.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

/// Filter applied to the JSON event log regardless of `RUST_LOG`.
pub const EVENT_LOG_FILTER: &str = "tanuki_server=info";

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("event log path has no file name: {0}")]
    InvalidPath(PathBuf),

    #[error("failed to create event log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("tracing subscriber already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Logging options chosen by the binary.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
    /// JSON-lines event log destination.
    pub event_log: Option<PathBuf>,
    /// Colorize stderr output.
    pub ansi: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            event_log: None,
            ansi: true,
        }
    }
}

impl LogOptions {
    pub fn with_event_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.event_log = Some(path.into());
        self
    }
}

/// Keeps the non-blocking event log writer alive. Dropping it flushes
/// buffered records, so hold it for the lifetime of `main`.
#[must_use = "dropping the guard stops the event log writer"]
pub struct LogGuard {
    _event_log: Option<WorkerGuard>,
}

/// Build the stderr filter from `RUST_LOG`, falling back to `default`.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber.
pub fn init(options: &LogOptions) -> Result<LogGuard, TelemetryError> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(options.ansi)
        .with_filter(env_filter(&options.default_filter));

    let (event_layer, guard) = match &options.event_log {
        Some(path) => {
            let (dir, file) = split_log_path(path)?;
            std::fs::create_dir_all(&dir).map_err(|source| TelemetryError::CreateDir {
                path: dir.clone(),
                source,
            })?;
            let appender = tracing_appender::rolling::never(&dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new(EVENT_LOG_FILTER));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(event_layer)
        .try_init()?;

    Ok(LogGuard { _event_log: guard })
}

/// Split an event log path into its directory and file name.
fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf), TelemetryError> {
    let file = path
        .file_name()
        .ok_or_else(|| TelemetryError::InvalidPath(path.to_path_buf()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, PathBuf::from(file)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_log_path() {
        let (dir, file) = split_log_path(Path::new("/var/log/tanuki/events.jsonl")).unwrap();
        assert_eq!(dir, PathBuf::from("/var/log/tanuki"));
        assert_eq!(file, PathBuf::from("events.jsonl"));
    }

    #[test]
    fn test_split_bare_file_name() {
        let (dir, file) = split_log_path(Path::new("events.jsonl")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(file, PathBuf::from("events.jsonl"));
    }

    #[test]
    fn test_split_rejects_directory_only() {
        assert!(matches!(
            split_log_path(Path::new("/")),
            Err(TelemetryError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_init_creates_event_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/events.jsonl");
        let options = LogOptions {
            ansi: false,
            ..LogOptions::default()
        }
        .with_event_log(&path);

        let guard = init(&options).unwrap();
        tracing::info!(target: "tanuki_server::session", session = "abcd1234", "connection opened");
        drop(guard);

        assert!(tmp.path().join("nested").is_dir());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("connection opened"));
    }
}
