//! Pluggable task decomposition strategies

use async_trait::async_trait;

use crate::{error::DecompositionError, models::Task, scheduler::SubtaskSpec};

/// Turns a task into subtasks and dependency edges.
///
/// The coordinator validates the result; a strategy only has to describe
/// the plan.
#[async_trait]
pub trait Decomposer: Send + Sync {
    /// Produce the subtask plan for `task`
    async fn decompose(&self, task: &Task) -> Result<Vec<SubtaskSpec>, DecompositionError>;
}

#[async_trait]
impl<F> Decomposer for F
where
    F: Fn(&Task) -> Result<Vec<SubtaskSpec>, DecompositionError> + Send + Sync,
{
    async fn decompose(&self, task: &Task) -> Result<Vec<SubtaskSpec>, DecompositionError> {
        self(task)
    }
}

/// Whole task as a single subtask with a fixed capability.
///
/// The subtask input is the task description and context.
#[derive(Debug, Clone)]
pub struct SingleStepDecomposer {
    capability: String,
}

impl SingleStepDecomposer {
    /// Create a decomposer dispatching to `capability`
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
        }
    }
}

#[async_trait]
impl Decomposer for SingleStepDecomposer {
    async fn decompose(&self, task: &Task) -> Result<Vec<SubtaskSpec>, DecompositionError> {
        Ok(vec![SubtaskSpec::new("main", self.capability.clone()).with_input(
            serde_json::json!({
                "description": task.description,
                "context": task.context,
            }),
        )])
    }
}

/// Fixed plan applied to every task.
///
/// Steps with a `null` input receive the task context instead.
#[derive(Debug, Clone, Default)]
pub struct PlanDecomposer {
    steps: Vec<SubtaskSpec>,
}

impl PlanDecomposer {
    /// Create a decomposer from a plan
    pub fn new(steps: Vec<SubtaskSpec>) -> Self {
        Self { steps }
    }

    /// Append a step
    pub fn step(mut self, step: SubtaskSpec) -> Self {
        self.steps.push(step);
        self
    }
}

#[async_trait]
impl Decomposer for PlanDecomposer {
    async fn decompose(&self, task: &Task) -> Result<Vec<SubtaskSpec>, DecompositionError> {
        Ok(self
            .steps
            .iter()
            .cloned()
            .map(|mut step| {
                if step.input.is_null() {
                    step.input = task.context.clone();
                }
                step
            })
            .collect())
    }
}
