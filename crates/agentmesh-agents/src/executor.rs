//! Runs one subtask attempt on an agent

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    agents::{Agent, AgentContext},
    models::{AgentFailure, AgentInput, AgentOutput},
};

/// How an attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The agent returned output
    Completed(AgentOutput),
    /// The agent reported a failure, or its task panicked
    Failed(AgentFailure),
    /// The attempt exceeded the subtask timeout
    TimedOut,
    /// The task was cancelled while the attempt ran
    Cancelled,
}

/// Outcome and wall time of one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    /// Outcome
    pub outcome: ExecutionOutcome,
    /// Wall time
    pub duration: Duration,
}

/// Runs attempts with a timeout and cooperative cancellation
#[derive(Debug, Clone)]
pub struct SubtaskExecutor {
    timeout: Duration,
}

impl SubtaskExecutor {
    /// Create an executor with a per-attempt timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Per-attempt timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one attempt.
    ///
    /// The agent runs on its own tokio task so a panic surfaces as a
    /// retryable failure. On timeout or cancellation the agent is signalled
    /// through its context token and left to wind down on its own.
    pub async fn run(&self, agent: Arc<dyn Agent>, input: AgentInput, context: AgentContext) -> ExecutionReport {
        let started = Instant::now();
        let task_token = context.cancel.clone();
        let attempt_token = task_token.child_token();
        let agent_context = AgentContext::new(attempt_token.clone(), context.memory);
        let subtask = input.name.clone();

        if task_token.is_cancelled() {
            return ExecutionReport {
                outcome: ExecutionOutcome::Cancelled,
                duration: started.elapsed(),
            };
        }

        let handle = tokio::spawn(async move { agent.process_task(input, agent_context).await });

        let outcome = tokio::select! {
            _ = task_token.cancelled() => {
                debug!(subtask = %subtask, "Attempt cancelled");
                ExecutionOutcome::Cancelled
            }
            joined = timeout(self.timeout, handle) => match joined {
                Ok(Ok(Ok(output))) => ExecutionOutcome::Completed(output),
                Ok(Ok(Err(failure))) => ExecutionOutcome::Failed(failure),
                Ok(Err(join_error)) => {
                    warn!(subtask = %subtask, error = %join_error, "Agent task aborted");
                    ExecutionOutcome::Failed(AgentFailure::retryable(format!(
                        "agent task aborted: {}",
                        join_error
                    )))
                }
                Err(_) => {
                    attempt_token.cancel();
                    warn!(
                        subtask = %subtask,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Attempt timed out"
                    );
                    ExecutionOutcome::TimedOut
                }
            },
        };

        ExecutionReport {
            outcome,
            duration: started.elapsed(),
        }
    }
}
