//! Data models for tasks, subtasks and agents

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::PerformanceMetrics;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// Identifier of a submitted task
    TaskId
);
id_type!(
    /// Identifier of a subtask
    SubtaskId
);
id_type!(
    /// Identifier of a registered agent
    AgentId
);
id_type!(
    /// Identifier of a network
    NetworkId
);

/// Lifecycle of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, not yet decomposed
    Pending,
    /// Decomposition strategy running
    Decomposing,
    /// Subtasks are being scheduled
    InProgress,
    /// Every subtask completed
    Completed,
    /// Too few subtasks completed
    Failed,
    /// Some subtasks failed but enough completed
    Partial,
}

impl TaskStatus {
    /// Whether the task will not change any more
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Partial)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Decomposing => "decomposing",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Partial => "partial",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a subtask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    /// Waiting on dependencies
    Blocked,
    /// Eligible for dispatch
    Ready,
    /// Dispatched to an agent
    Assigned,
    /// Finished successfully
    Completed,
    /// Terminally failed
    Failed,
}

impl SubtaskStatus {
    /// Whether the subtask will not change any more
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubtaskStatus::Completed | SubtaskStatus::Failed)
    }
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubtaskStatus::Blocked => "blocked",
            SubtaskStatus::Ready => "ready",
            SubtaskStatus::Assigned => "assigned",
            SubtaskStatus::Completed => "completed",
            SubtaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a subtask failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The agent reported a retryable failure
    Retryable,
    /// The agent reported a fatal failure
    Fatal,
    /// The attempt or the task ran out of time
    Timeout,
    /// A dependency failed, so the subtask could never run
    DependencyFailed,
    /// The task was cancelled
    Cancelled,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureCause::Retryable => "retryable",
            FailureCause::Fatal => "fatal",
            FailureCause::Timeout => "timeout",
            FailureCause::DependencyFailed => "dependency_failed",
            FailureCause::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A terminal subtask failure, as reported on the task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskFailure {
    /// Failed subtask
    pub subtask_id: SubtaskId,
    /// Its name
    pub name: String,
    /// Cause
    pub cause: FailureCause,
    /// Detail
    pub message: String,
    /// Attempts made
    pub attempts: u32,
}

/// A unit of work within a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    /// Identifier
    pub id: SubtaskId,
    /// Parent task
    pub task_id: TaskId,
    /// Name, unique within the task
    pub name: String,
    /// Capability tag an agent must declare to take this subtask
    pub capability: String,
    /// Input payload
    pub input: serde_json::Value,
    /// Subtasks that must complete first
    pub dependencies: Vec<SubtaskId>,
    /// Agent currently or last assigned
    pub assigned_agent: Option<AgentId>,
    /// Status
    pub status: SubtaskStatus,
    /// Result payload, once completed
    pub result: Option<serde_json::Value>,
    /// Agent-provided summary of the result
    pub summary: Option<String>,
    /// Times the subtask was re-queued after a failed attempt
    pub retry_count: u32,
    /// Attempts dispatched so far
    pub attempts: u32,
    /// Mesh-wide creation order, used to break priority ties
    pub sequence: u64,
    /// Most recent failure
    pub last_error: Option<String>,
}

/// Task submission request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Free-text description
    pub description: String,
    /// Context payload
    #[serde(default)]
    pub context: serde_json::Value,
    /// Priority, higher is more urgent
    #[serde(default)]
    pub priority: i32,
}

impl TaskRequest {
    /// Create a request with empty context and priority 0
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            context: serde_json::Value::Null,
            priority: 0,
        }
    }

    /// Set context
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Set priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A submitted task and everything known about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier
    pub id: TaskId,
    /// Free-text description
    pub description: String,
    /// Context payload
    pub context: serde_json::Value,
    /// Priority, higher is more urgent
    pub priority: i32,
    /// Status
    pub status: TaskStatus,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Time the task reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Synthesized result for completed and partial tasks
    pub result: Option<serde_json::Value>,
    /// Subtasks in creation order
    pub subtasks: Vec<Subtask>,
    /// Terminal subtask failures
    pub failures: Vec<SubtaskFailure>,
    /// Task-level error, e.g. a decomposition failure
    pub error: Option<String>,
}

impl Task {
    /// Create a pending task
    pub fn new(request: TaskRequest) -> Self {
        Self {
            id: TaskId::new(),
            description: request.description,
            context: request.context,
            priority: request.priority,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            subtasks: Vec::new(),
            failures: Vec::new(),
            error: None,
        }
    }

    /// Look up a subtask by name
    pub fn subtask(&self, name: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.name == name)
    }

    /// Number of subtasks in a given status
    pub fn count(&self, status: SubtaskStatus) -> usize {
        self.subtasks.iter().filter(|s| s.status == status).count()
    }
}

/// Lifetime status of a registered agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Eligible for work
    Active,
    /// Its circuit is open; skipped by selection
    Degraded,
    /// Switched off by an operator
    Disabled,
}

/// Registration record the coordinator keeps per agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Identifier
    pub id: AgentId,
    /// Agent name
    pub name: String,
    /// Capability tags
    pub capabilities: BTreeSet<String>,
    /// In-flight subtasks
    pub load: usize,
    /// Upper bound on in-flight subtasks
    pub max_load: Option<usize>,
    /// Lifetime status
    pub status: AgentStatus,
    /// Rolling performance
    pub metrics: PerformanceMetrics,
    /// Registration time
    pub registered_at: DateTime<Utc>,
}

impl AgentRecord {
    /// Whether the agent declares `capability`
    pub fn can_handle(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Whether the agent has room for another subtask
    pub fn has_capacity(&self) -> bool {
        self.max_load.map_or(true, |max| self.load < max)
    }
}

/// Input handed to an agent for one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInput {
    /// Parent task
    pub task_id: TaskId,
    /// Subtask being processed
    pub subtask_id: SubtaskId,
    /// Subtask name
    pub name: String,
    /// Required capability
    pub capability: String,
    /// Subtask payload
    pub payload: serde_json::Value,
    /// Parent task description
    pub task_description: String,
    /// Parent task context
    pub task_context: serde_json::Value,
    /// Results of completed dependencies, by subtask name
    pub dependency_results: BTreeMap<String, serde_json::Value>,
    /// 1-based attempt number
    pub attempt: u32,
}

/// Successful agent output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Result payload
    pub result: serde_json::Value,
    /// Short human-readable summary
    pub summary: Option<String>,
}

impl AgentOutput {
    /// Output with a result and no summary
    pub fn new(result: serde_json::Value) -> Self {
        Self {
            result,
            summary: None,
        }
    }

    /// Attach a summary
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

/// Whether a failed attempt may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Try again, possibly on another agent
    Retryable,
    /// Do not try again
    Fatal,
}

/// Structured failure an agent reports instead of panicking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?} agent failure: {message}")]
pub struct AgentFailure {
    /// Retry classification
    pub kind: FailureClass,
    /// Detail
    pub message: String,
}

impl AgentFailure {
    /// A failure worth retrying
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureClass::Retryable,
            message: message.into(),
        }
    }

    /// A failure not worth retrying
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureClass::Fatal,
            message: message.into(),
        }
    }

    /// Whether the coordinator may retry
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureClass::Retryable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Partial.is_terminal());
        assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
    }

    #[test]
    fn test_task_request_builder() {
        let task = Task::new(
            TaskRequest::new("write a report")
                .with_priority(5)
                .with_context(serde_json::json!({"audience": "ops"})),
        );
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, 5);
        assert_eq!(task.context["audience"], "ops");
    }

    #[test]
    fn test_agent_failure_classes() {
        assert!(AgentFailure::retryable("flaky").is_retryable());
        assert!(!AgentFailure::fatal("bad input").is_retryable());
        assert_eq!(
            AgentFailure::fatal("bad input").to_string(),
            "Fatal agent failure: bad input"
        );
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = TaskId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
