//! Error types for the providers module

use agentmesh_common::{FailureKind, RATE_LIMITED_KIND};
use thiserror::Error;

/// Errors that can occur when calling a backend model provider
#[derive(Debug, Error, PartialEq, Clone)]
pub enum ProviderError {
    /// Provider not found by ID
    #[error("Provider not found: {0}")]
    NotFound(String),

    /// Rate limited by provider
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// The call did not finish within its allotted time
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Network error occurred
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Generic provider error
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,
}

impl FailureKind for ProviderError {
    fn failure_kind(&self) -> &str {
        match self {
            ProviderError::NotFound(_) => "not_found",
            ProviderError::RateLimited(_) => RATE_LIMITED_KIND,
            ProviderError::Timeout(_) => "timeout",
            ProviderError::NetworkError(_) => "network",
            ProviderError::ProviderError(_) => "provider",
            ProviderError::ConfigError(_) => "config",
            ProviderError::SerializationError(_) => "serialization",
            ProviderError::Cancelled => "cancelled",
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::ProviderError("Request timeout".to_string())
        } else if err.is_connect() {
            ProviderError::NetworkError(err.to_string())
        } else {
            ProviderError::ProviderError(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_uses_excluded_kind() {
        assert_eq!(ProviderError::RateLimited(3).failure_kind(), "rate_limited");
        assert_eq!(ProviderError::NetworkError("x".into()).failure_kind(), "network");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            ProviderError::RateLimited(5).to_string(),
            "Rate limited, retry after 5 seconds"
        );
        assert_eq!(ProviderError::Timeout(250).to_string(), "Request timed out after 250 ms");
    }
}
