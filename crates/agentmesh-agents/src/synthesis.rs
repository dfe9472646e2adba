//! Aggregating subtask results into a task result

use serde_json::{json, Map, Value};

use crate::models::{SubtaskStatus, Task};

/// Builds the final result of a completed or partial task
pub trait ResultSynthesizer: Send + Sync {
    /// Combine the results of `task`'s completed subtasks
    fn synthesize(&self, task: &Task) -> Value;
}

/// Default synthesizer.
///
/// Produces `{ "task", "results", "summaries", "failed" }` where `results`
/// maps subtask names to results, `summaries` lists distinct summaries and
/// `failed` the failed subtask names. All three follow subtask creation
/// order.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeSynthesizer;

impl ResultSynthesizer for MergeSynthesizer {
    fn synthesize(&self, task: &Task) -> Value {
        let mut subtasks: Vec<_> = task.subtasks.iter().collect();
        subtasks.sort_by_key(|s| s.sequence);

        let mut results = Map::new();
        let mut summaries: Vec<String> = Vec::new();
        let mut failed = Vec::new();

        for subtask in subtasks {
            match subtask.status {
                SubtaskStatus::Completed => {
                    results.insert(
                        subtask.name.clone(),
                        subtask.result.clone().unwrap_or(Value::Null),
                    );
                    if let Some(summary) = &subtask.summary {
                        if !summaries.contains(summary) {
                            summaries.push(summary.clone());
                        }
                    }
                }
                SubtaskStatus::Failed => failed.push(subtask.name.clone()),
                _ => {}
            }
        }

        json!({
            "task": task.description,
            "results": results,
            "summaries": summaries,
            "failed": failed,
        })
    }
}
