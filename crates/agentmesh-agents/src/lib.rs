//! Agent coordination for the agent mesh
//!
//! - **Agent**: the contract every specialized agent implements
//! - **AgentRegistry**: capability index, health and load-aware selection
//! - **TaskDag / ReadyQueue**: dependency validation and dispatch order
//! - **AgentCoordinator**: decomposition, dispatch, retries, failure
//!   propagation and synthesis for one network
//! - **MeshRuntime**: tenant networks created on demand and reaped when idle
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use agentmesh_agents::{AgentCoordinator, AgentRegistration, SingleStepDecomposer, TaskRequest};
//!
//! let coordinator = AgentCoordinator::builder(Arc::new(SingleStepDecomposer::new("summary")), memory).build();
//! coordinator.register_agent(AgentRegistration::new(Arc::new(my_agent)))?;
//! let task_id = coordinator.submit_task(TaskRequest::new("summarize the report")).await?;
//! let task = coordinator.wait_for_task(task_id).await?;
//! ```

#![warn(missing_docs)]

pub mod agents;
pub mod coordinator;
pub mod decomposition;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod models;
pub mod network;
pub mod registry;
pub mod scheduler;
pub mod synthesis;

#[cfg(test)]
mod coordinator_properties;
#[cfg(test)]
mod scheduler_properties;

pub use agents::{Agent, AgentContext, ModelAgent, MODEL_CHAIN_DEPENDENCY};
pub use coordinator::{completion_status, AgentCoordinator, CoordinatorBuilder, CoordinatorConfig};
pub use decomposition::{Decomposer, PlanDecomposer, SingleStepDecomposer};
pub use error::{CoordinatorError, DecompositionError, Result};
pub use executor::{ExecutionOutcome, ExecutionReport, SubtaskExecutor};
pub use metrics::{
    CoordinatorStats, PerformanceMetrics, SUBTASK_COMPLETED_EVENT, SUBTASK_FAILED_EVENT, TASK_FINISHED_EVENT,
};
pub use models::{
    AgentFailure, AgentId, AgentInput, AgentOutput, AgentRecord, AgentStatus, FailureCause, FailureClass, NetworkId,
    Subtask, SubtaskFailure, SubtaskId, SubtaskStatus, Task, TaskId, TaskRequest, TaskStatus,
};
pub use network::{MeshRuntime, ModelAgentBlueprint, Network, NetworkBlueprint, NetworkContext, RuntimeConfig};
pub use registry::{AgentRegistration, AgentRegistry};
pub use scheduler::{ReadyEntry, ReadyQueue, SubtaskSpec, TaskDag};
pub use synthesis::{MergeSynthesizer, ResultSynthesizer};
