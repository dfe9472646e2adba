//! Tracing subscriber setup

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors raised while installing the global subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The level or filter directive could not be parsed
    #[error("Invalid log filter '{0}': {1}")]
    InvalidFilter(String, String),

    /// A global subscriber is already installed
    #[error("Failed to install subscriber: {0}")]
    Install(String),
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Default level or filter directive, used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Include source file and line number
    pub debug: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            debug: false,
        }
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise the configured level
pub fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| LoggingError::InvalidFilter(level.to_string(), e.to_string()))
}

/// Install the global tracing subscriber, writing to stderr
pub fn init_tracing(settings: &LogSettings) -> Result<(), LoggingError> {
    let filter = build_filter(&settings.level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(settings.debug)
        .with_file(settings.debug)
        .with_line_number(settings.debug)
        .with_writer(std::io::stderr);

    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| LoggingError::Install(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_accepts_directives() {
        assert!(build_filter("debug").is_ok());
        assert!(build_filter("agentmesh_agents=trace,info").is_ok());
    }

    #[test]
    fn test_second_init_reports_error() {
        let settings = LogSettings::default();
        let _ = init_tracing(&settings);
        assert!(matches!(init_tracing(&settings), Err(LoggingError::Install(_))));
    }
}
