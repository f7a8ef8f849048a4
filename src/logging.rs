//! Logging initialization
//!
//! Installs a `tracing-subscriber` fmt subscriber writing to stderr, so that
//! stdout carries only the run report. The level comes from the verbosity
//! flags unless `RUST_LOG` is set, in which case `RUST_LOG` wins.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// `RUST_LOG` holds an unparseable directive
    #[error("Invalid RUST_LOG directive: {0}")]
    InvalidFilter(String),

    /// A global subscriber was already installed
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Log level selected by the verbosity flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// `--verbose`
    Debug,
    /// No flag
    #[default]
    Info,
    /// `--quiet`
    Warn,
}

impl LogLevel {
    /// Level for the mutually exclusive `--verbose` / `--quiet` flags
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => LogLevel::Debug,
            (false, true) => LogLevel::Warn,
            (false, false) => LogLevel::Info,
        }
    }

    /// Convert to tracing Level
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
        }
    }
}

/// Build the filter: `RUST_LOG` if set, the flag-derived level otherwise
pub fn build_filter(level: LogLevel, rust_log: Option<&str>) -> Result<EnvFilter, LoggingError> {
    match rust_log.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| LoggingError::InvalidFilter(e.to_string())),
        None => Ok(EnvFilter::default().add_directive(level.to_tracing_level().into())),
    }
}

/// Install the global subscriber
pub fn init_logging(level: LogLevel) -> Result<(), LoggingError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(level, rust_log.as_deref())?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_flags() {
        assert_eq!(LogLevel::from_flags(false, false), LogLevel::Info);
        assert_eq!(LogLevel::from_flags(true, false), LogLevel::Debug);
        assert_eq!(LogLevel::from_flags(false, true), LogLevel::Warn);
    }

    #[test]
    fn test_filter_uses_level_without_rust_log() {
        let filter = build_filter(LogLevel::Warn, None).unwrap();
        assert_eq!(filter.to_string(), "warn");

        let filter = build_filter(LogLevel::Debug, Some("  ")).unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn test_rust_log_overrides_level() {
        let filter = build_filter(LogLevel::Warn, Some("tunnel_ingest=trace")).unwrap();
        assert_eq!(filter.to_string(), "tunnel_ingest=trace");
    }

    #[test]
    fn test_invalid_rust_log() {
        assert!(matches!(
            build_filter(LogLevel::Info, Some("tunnel_ingest=loud")),
            Err(LoggingError::InvalidFilter(_))
        ));
    }
}
