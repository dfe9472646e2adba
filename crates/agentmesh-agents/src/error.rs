//! Error types for coordination

use thiserror::Error;

/// Reasons a task cannot be broken into a valid subtask graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecompositionError {
    /// A subtask has an empty name
    #[error("Subtask name must not be empty")]
    EmptyName,

    /// Two subtasks share a name
    #[error("Duplicate subtask name: {0}")]
    DuplicateName(String),

    /// A dependency names no subtask of the plan
    #[error("Subtask {subtask} depends on unknown subtask {dependency}")]
    UnknownDependency {
        /// Dependent subtask
        subtask: String,
        /// Missing dependency
        dependency: String,
    },

    /// A subtask depends on itself
    #[error("Subtask {0} depends on itself")]
    SelfDependency(String),

    /// The dependency graph has a cycle
    #[error("Circular dependency detected: {0}")]
    Cycle(String),

    /// The decomposition strategy itself failed
    #[error("Decomposition strategy failed: {0}")]
    Strategy(String),
}

impl DecompositionError {
    /// Create a strategy error
    pub fn strategy(reason: impl Into<String>) -> Self {
        Self::Strategy(reason.into())
    }
}

/// Errors returned by the coordinator and runtime APIs
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinatorError {
    /// No such task
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// No such agent
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Invalid request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Decomposition failed
    #[error("Decomposition failed: {0}")]
    Decomposition(#[from] DecompositionError),

    /// The coordinator no longer accepts work
    #[error("Coordinator is shutting down")]
    ShuttingDown,

    /// An evicted task's snapshot could not be read back
    #[error("Task history unavailable: {0}")]
    HistoryUnavailable(String),
}

impl CoordinatorError {
    /// Create a TaskNotFound error
    pub fn task_not_found(task_id: impl ToString) -> Self {
        Self::TaskNotFound(task_id.to_string())
    }

    /// Create an AgentNotFound error
    pub fn agent_not_found(agent_id: impl ToString) -> Self {
        Self::AgentNotFound(agent_id.to_string())
    }

    /// Create an InvalidInput error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }
}

/// Result type for coordination operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
