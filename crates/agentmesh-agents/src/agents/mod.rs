//! Agent trait and implementations

pub mod model;

use std::collections::BTreeSet;

use agentmesh_common::CircuitState;
use agentmesh_memory::ScopedMemory;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::models::{AgentFailure, AgentInput, AgentOutput};

pub use model::{ModelAgent, MODEL_CHAIN_DEPENDENCY};

/// Per-attempt context handed to an agent
#[derive(Clone)]
pub struct AgentContext {
    /// Signalled when the task times out or is cancelled. Agents must
    /// check it at every suspension point.
    pub cancel: CancellationToken,
    /// Shared memory of the agent's network
    pub memory: ScopedMemory,
}

impl AgentContext {
    /// Create a context
    pub fn new(cancel: CancellationToken, memory: ScopedMemory) -> Self {
        Self { cancel, memory }
    }

    /// Whether the attempt has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Capability-tagged unit of work.
///
/// The coordinator only ever calls [`process_task`](Agent::process_task)
/// and never depends on concrete agent types. Model and memory access are
/// the agent's own business but go through the fallback chain and the
/// shared memory store.
///
/// # Examples
///
/// ```ignore
/// use std::collections::BTreeSet;
/// use agentmesh_agents::{Agent, AgentContext, AgentFailure, AgentInput, AgentOutput};
/// use async_trait::async_trait;
///
/// struct Echo;
///
/// #[async_trait]
/// impl Agent for Echo {
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     fn capabilities(&self) -> BTreeSet<String> {
///         BTreeSet::from(["echo".to_string()])
///     }
///
///     async fn process_task(
///         &self,
///         input: AgentInput,
///         _context: AgentContext,
///     ) -> Result<AgentOutput, AgentFailure> {
///         Ok(AgentOutput::new(input.payload))
///     }
/// }
/// ```
#[async_trait]
pub trait Agent: Send + Sync {
    /// Human-readable name, also used as the consumer name of its breakers
    fn name(&self) -> &str;

    /// Capability tags this agent accepts
    fn capabilities(&self) -> BTreeSet<String>;

    /// Process one subtask attempt.
    ///
    /// Failures are reported as [`AgentFailure`] so the coordinator can tell
    /// retryable from fatal outcomes.
    async fn process_task(
        &self,
        input: AgentInput,
        context: AgentContext,
    ) -> Result<AgentOutput, AgentFailure>;

    /// State of the agent's own circuit breaker, for health reporting
    fn circuit_state(&self) -> CircuitState {
        CircuitState::Closed
    }
}
