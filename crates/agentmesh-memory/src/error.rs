//! Memory store error types

use agentmesh_common::FailureKind;
use thiserror::Error;

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors raised by a backing store
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    /// The store could not be reached
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the operation
    #[error("Backing store error: {0}")]
    Rejected(String),
}

impl FailureKind for BackendError {
    fn failure_kind(&self) -> &str {
        match self {
            BackendError::Unavailable(_) => "unavailable",
            BackendError::Rejected(_) => "rejected",
        }
    }
}

/// Errors surfaced by the shared memory store
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MemoryError {
    /// The write request is malformed
    #[error("Invalid memory item: {0}")]
    InvalidItem(String),

    /// A value could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// The store is unreachable or its circuit is open
    #[error("Shared memory unavailable")]
    Unavailable,

    /// The store failed the operation
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::Codec(err.to_string())
    }
}

impl From<std::io::Error> for MemoryError {
    fn from(err: std::io::Error) -> Self {
        MemoryError::Codec(err.to_string())
    }
}
