//! Rolling agent performance and coordinator counters

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Event emitted when a subtask completes
pub const SUBTASK_COMPLETED_EVENT: &str = "subtask.completed";
/// Event emitted on every failed subtask attempt
pub const SUBTASK_FAILED_EVENT: &str = "subtask.failed";
/// Event emitted when a task reaches a terminal status
pub const TASK_FINISHED_EVENT: &str = "task.finished";

/// Weight of the newest observation in the rolling averages
const EWMA_ALPHA: f64 = 0.2;

/// Rolling performance of one agent.
///
/// Success rate and latency are exponentially weighted, so recent
/// behavior dominates. The first observation seeds both averages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Attempts finished
    pub attempts: u64,
    /// Attempts that succeeded
    pub successes: u64,
    /// Attempts that failed or timed out
    pub failures: u64,
    /// Weighted success rate, 0.0 to 1.0
    pub success_rate: f64,
    /// Weighted latency in milliseconds
    pub avg_latency_ms: f64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            attempts: 0,
            successes: 0,
            failures: 0,
            success_rate: 1.0,
            avg_latency_ms: 0.0,
        }
    }
}

impl PerformanceMetrics {
    /// Fold one finished attempt into the averages
    pub fn record(&mut self, success: bool, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let outcome = if success { 1.0 } else { 0.0 };

        if self.attempts == 0 {
            self.success_rate = outcome;
            self.avg_latency_ms = latency_ms;
        } else {
            self.success_rate += EWMA_ALPHA * (outcome - self.success_rate);
            self.avg_latency_ms += EWMA_ALPHA * (latency_ms - self.avg_latency_ms);
        }

        self.attempts += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
    }
}

/// Coordinator-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// Tasks accepted
    pub tasks_submitted: u64,
    /// Tasks finished as completed
    pub tasks_completed: u64,
    /// Tasks finished as partial
    pub tasks_partial: u64,
    /// Tasks finished as failed
    pub tasks_failed: u64,
    /// Subtask attempts dispatched
    pub dispatched: u64,
    /// Attempts re-queued after a failure
    pub retries: u64,
    /// Subtasks failed because a dependency failed
    pub propagated_failures: u64,
    /// Attempts that exceeded the subtask timeout
    pub timeouts: u64,
}
