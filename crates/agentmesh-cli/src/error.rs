//! CLI errors

use thiserror::Error;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Task error: {0}")]
    Task(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CliError {
    /// User-facing message with a hint where one helps
    pub fn user_message(&self) -> String {
        match self {
            CliError::InvalidArgument { message } => {
                format!("Invalid argument: {}\n\nRun 'agentmesh --help' for usage information.", message)
            }
            CliError::Io(e) => format!("File operation failed: {}", e),
            CliError::Config(msg) => {
                format!("Configuration error: {}\n\nRun 'agentmesh config show' to check your configuration.", msg)
            }
            CliError::Provider(msg) => {
                format!("Provider error: {}\n\nCheck the [[providers]] entries of your configuration.", msg)
            }
            CliError::Task(msg) => format!("Task failed: {}", msg),
            CliError::Internal(msg) => format!("Internal error: {}", msg),
        }
    }
}

impl From<agentmesh_config::ConfigError> for CliError {
    fn from(err: agentmesh_config::ConfigError) -> Self {
        CliError::Config(err.to_string())
    }
}

impl From<agentmesh_providers::ProviderError> for CliError {
    fn from(err: agentmesh_providers::ProviderError) -> Self {
        CliError::Provider(err.to_string())
    }
}

impl From<agentmesh_agents::CoordinatorError> for CliError {
    fn from(err: agentmesh_agents::CoordinatorError) -> Self {
        CliError::Task(err.to_string())
    }
}

impl From<agentmesh_common::LoggingError> for CliError {
    fn from(err: agentmesh_common::LoggingError) -> Self {
        CliError::Internal(err.to_string())
    }
}

/// Result alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hints() {
        let err = CliError::Config("bad".to_string());
        assert!(err.user_message().contains("agentmesh config show"));
        let err = CliError::InvalidArgument {
            message: "tenant".to_string(),
        };
        assert!(err.user_message().contains("--help"));
    }
}
