//! Tracing setup for Recast
//!
//! Console output follows the level the user picked. A second layer writes
//! every event, down to per-sample trace lines, to a file that is replaced on
//! each run so a failed conversion can be diagnosed after the fact.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File name of the full trace log inside the logs directory.
pub const LOG_FILE_NAME: &str = "recast-last-run.log";

/// Environment variable that overrides the console filter.
pub const LOG_FILTER_ENV: &str = "RECAST_LOG";

/// Path of the trace log for `logs_dir`, defaulting to `./logs`.
pub fn log_file_path(logs_dir: Option<&Path>) -> PathBuf {
    logs_dir.unwrap_or_else(|| Path::new("logs")).join(LOG_FILE_NAME)
}

/// Installs the console and trace file layers.
///
/// The console filter comes from `RECAST_LOG` when set, `console_level`
/// otherwise. The file layer always records at trace level.
///
/// # Errors
/// - `std::io::Error` - Logs directory or log file cannot be created
/// - `tracing_subscriber::util::TryInitError` - A global subscriber is already installed
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = log_file_path(logs_dir);
    if let Some(parent) = log_path.parent() {
        create_dir_all(parent)?;
    }
    let log_file = File::create(&log_path)?;

    let console_filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));
    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!(
        "Tracing initialized: console={console_level}, trace_file={}",
        log_path.display()
    );
    Ok(())
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Recovered failures such as encoder fallbacks
    Warn,
    /// Attempt boundaries and results
    Info,
    /// Transfer loop events
    Debug,
    /// Per-sample detail
    Trace,
}

impl CliLogLevel {
    /// Converts CLI log level to tracing Level enum.
    ///
    /// # Examples
    /// ```
    /// use recast_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(CliLogLevel::Warn.as_tracing_level(), tracing::Level::WARN);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::str::FromStr for CliLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(CliLogLevel::Error),
            "warn" | "warning" => Ok(CliLogLevel::Warn),
            "info" => Ok(CliLogLevel::Info),
            "debug" => Ok(CliLogLevel::Debug),
            "trace" => Ok(CliLogLevel::Trace),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Warn => "warn",
            CliLogLevel::Info => "info",
            CliLogLevel::Debug => "debug",
            CliLogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_round_trip() {
        for level in [
            CliLogLevel::Error,
            CliLogLevel::Warn,
            CliLogLevel::Info,
            CliLogLevel::Debug,
            CliLogLevel::Trace,
        ] {
            assert_eq!(level.to_string().parse::<CliLogLevel>(), Ok(level));
        }
        assert_eq!("WARNING".parse::<CliLogLevel>(), Ok(CliLogLevel::Warn));
        assert!("loud".parse::<CliLogLevel>().is_err());
    }

    #[test]
    fn test_log_file_location() {
        assert_eq!(
            log_file_path(None),
            PathBuf::from("logs").join("recast-last-run.log")
        );
        assert_eq!(
            log_file_path(Some(Path::new("/tmp/recast"))),
            PathBuf::from("/tmp/recast/recast-last-run.log")
        );
    }
}
