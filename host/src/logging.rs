//! Tracing subscriber setup.
//!
//! Stdout may be carrying the protocol stream, so logs go to the configured
//! file or to stderr, never to stdout.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use lspbridge_config::LogConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "info";

/// `RUST_LOG` wins, then the configured filter, then `info`. An unparsable
/// filter degrades to `warn`.
#[must_use]
pub fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter.as_deref().unwrap_or(DEFAULT_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_tracing(config: &LogConfig) {
    let mut warnings = Vec::new();
    let log_file = config
        .file
        .as_deref()
        .and_then(|path| match open_log_file(path) {
            Ok(file) => Some(file),
            Err(e) => {
                warnings.push(format!("Failed to open log file {}: {e}", path.display()));
                None
            }
        });

    let (file_layer, stderr_layer) = match log_file {
        Some(file) => (
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            None,
        ),
        None => (None, Some(fmt::layer().with_writer(io::stderr))),
    };

    if tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(env_filter(config))
        .try_init()
        .is_err()
    {
        return;
    }

    if let Some(path) = &config.file
        && warnings.is_empty()
    {
        tracing::info!(path = %path.display(), "Logging initialized");
    }
    for warning in warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_log_file_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/nested/bridge.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn open_log_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.log");
        fs::write(&path, "earlier\n").unwrap();
        drop(open_log_file(&path).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "earlier\n");
    }

    #[test]
    fn open_log_file_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        assert!(open_log_file(&blocker.join("bridge.log")).is_err());
    }

    #[test]
    fn init_twice_does_not_panic() {
        let config = LogConfig {
            filter: Some("lspbridge=debug".to_string()),
            file: None,
        };
        init_tracing(&config);
        init_tracing(&config);
    }
}
