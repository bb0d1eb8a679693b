//! Logging setup
//!
//! Logs go to stderr (and optionally a file) so stdout carries only the
//! query report.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Log level (trace, debug, info, warn, error) or a full `EnvFilter` directive
    pub level: String,

    /// Log format (human, json)
    pub format: LogFormat,

    /// Optional log file path
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[serde(alias = "pretty", alias = "text")]
    Human,
    Json,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Human,
            file: None,
        }
    }
}

impl LogSettings {
    /// Write logs to a file as well
    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Filter built from `level`, falling back to `info` when it does not parse
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber
///
/// Returns the file writer guard when file output is enabled; dropping it
/// flushes and stops the background writer.
pub fn init_logging(settings: &LogSettings) -> Result<Option<WorkerGuard>> {
    let console_layer = match settings.format {
        LogFormat::Human => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let (file_layer, guard) = match settings.file {
        Some(ref path) => {
            let (dir, file_name) = split_log_path(path)?;
            ensure_log_dir(&dir)?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(settings.env_filter())
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    tracing::debug!(level = %settings.level, file = ?settings.file, "logging initialized");

    Ok(guard)
}

fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Logging(format!("Log path has no file name: {}", path.display())))?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    Ok((dir, PathBuf::from(file_name)))
}

/// Create the log directory if missing
fn ensure_log_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_names() {
        let parse = |name: &str| serde_json::from_value::<LogFormat>(serde_json::json!(name));

        assert_eq!(parse("json").unwrap(), LogFormat::Json);
        assert_eq!(parse("human").unwrap(), LogFormat::Human);
        assert_eq!(parse("pretty").unwrap(), LogFormat::Human);
        assert_eq!(parse("text").unwrap(), LogFormat::Human);
        assert!(parse("xml").is_err());
    }

    #[test]
    fn test_split_log_path() {
        let (dir, name) = split_log_path(Path::new("logs/bookstore.log")).unwrap();
        assert_eq!(dir, PathBuf::from("logs"));
        assert_eq!(name, PathBuf::from("bookstore.log"));

        let (dir, _) = split_log_path(Path::new("bookstore.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));

        assert!(split_log_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_invalid_level_falls_back() {
        let settings = LogSettings {
            level: "bookstore=verbose".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.env_filter().to_string(), "info");

        let debug = LogSettings {
            level: "debug".to_string(),
            ..Default::default()
        };
        assert_eq!(debug.env_filter().to_string(), "debug");
    }

    #[test]
    fn test_second_init_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogSettings::default().with_file(dir.path().join("run.log"));

        let first = init_logging(&settings);
        let second = init_logging(&LogSettings::default());

        // Another test may already own the global subscriber; either way the
        // second call must not panic and must report an error.
        assert!(first.is_ok() || matches!(first, Err(Error::Logging(_))));
        assert!(matches!(second, Err(Error::Logging(_))));
    }
}
