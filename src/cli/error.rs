//! CLI-specific error types

use thiserror::Error;

use crate::config::ConfigError;
use crate::logging::LoggingError;
use crate::pipeline::PipelineError;

/// Exit status for a successful run
pub const EXIT_SUCCESS: i32 = 0;

/// Exit status for a runtime failure
pub const EXIT_FAILURE: i32 = 1;

/// Exit status for configuration and usage errors
pub const EXIT_USAGE: i32 = 2;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] LoggingError),

    #[error("Failed to create runtime: {0}")]
    Runtime(String),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),
}

impl CliError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::Logging(_) => EXIT_USAGE,
            CliError::Runtime(_) => EXIT_FAILURE,
            CliError::Pipeline(e) => e.exit_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            CliError::Config(ConfigError::Missing("ssh host")).exit_code(),
            EXIT_USAGE
        );
        assert_eq!(
            CliError::Runtime("no threads".to_string()).exit_code(),
            EXIT_FAILURE
        );
        assert_eq!(
            CliError::Pipeline(PipelineError::Interrupted).exit_code(),
            130
        );
    }
}
