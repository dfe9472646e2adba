//! Subtask DAG construction and the ready queue

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{
    error::DecompositionError,
    models::{Subtask, SubtaskId, SubtaskStatus, Task, TaskId},
};

/// One subtask as produced by a decomposition strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskSpec {
    /// Name, unique within the task
    pub name: String,
    /// Required capability tag
    pub capability: String,
    /// Input payload
    #[serde(default)]
    pub input: serde_json::Value,
    /// Names of subtasks that must complete first
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl SubtaskSpec {
    /// Create a spec with no input and no dependencies
    pub fn new(name: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capability: capability.into(),
            input: serde_json::Value::Null,
            depends_on: Vec::new(),
        }
    }

    /// Set the input payload
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    /// Add a dependency by name
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }
}

/// Validated dependency graph of a plan, keyed by subtask name
#[derive(Debug, Clone)]
pub struct TaskDag {
    /// Map of subtask name to its dependencies
    pub dependencies: HashMap<String, Vec<String>>,
    /// Map of subtask name to subtasks that depend on it
    pub dependents: HashMap<String, Vec<String>>,
    order: Vec<String>,
}

impl TaskDag {
    /// Build and validate the graph of `specs`.
    ///
    /// Rejects empty and duplicate names, unknown or self dependencies and
    /// cycles.
    pub fn from_specs(specs: &[SubtaskSpec]) -> Result<Self, DecompositionError> {
        let mut dependencies = HashMap::with_capacity(specs.len());
        let mut dependents: HashMap<String, Vec<String>> = HashMap::with_capacity(specs.len());
        let mut order = Vec::with_capacity(specs.len());

        for spec in specs {
            if spec.name.trim().is_empty() {
                return Err(DecompositionError::EmptyName);
            }
            if dependencies.insert(spec.name.clone(), Vec::new()).is_some() {
                return Err(DecompositionError::DuplicateName(spec.name.clone()));
            }
            dependents.insert(spec.name.clone(), Vec::new());
            order.push(spec.name.clone());
        }

        for spec in specs {
            let mut seen = HashSet::new();
            for dep in &spec.depends_on {
                if *dep == spec.name {
                    return Err(DecompositionError::SelfDependency(spec.name.clone()));
                }
                if !dependencies.contains_key(dep) {
                    return Err(DecompositionError::UnknownDependency {
                        subtask: spec.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                // Repeated edges collapse to one.
                if !seen.insert(dep.clone()) {
                    continue;
                }
                if let Some(deps) = dependencies.get_mut(&spec.name) {
                    deps.push(dep.clone());
                }
                if let Some(users) = dependents.get_mut(dep) {
                    users.push(spec.name.clone());
                }
            }
        }

        let dag = Self {
            dependencies,
            dependents,
            order,
        };
        dag.detect_cycles()?;
        Ok(dag)
    }

    /// Subtask names in plan order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Subtasks with no dependencies, in plan order
    pub fn roots(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| self.get_dependencies(name).is_empty())
            .cloned()
            .collect()
    }

    /// Get dependencies of a subtask
    pub fn get_dependencies(&self, name: &str) -> &[String] {
        self.dependencies.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Get subtasks that depend on a subtask
    pub fn get_dependents(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Group subtasks into phases: every subtask of a phase depends only on
    /// subtasks of earlier phases.
    pub fn phases(&self) -> Vec<Vec<String>> {
        let mut phases = Vec::new();
        let mut done: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&String> = self.order.iter().collect();

        while !remaining.is_empty() {
            let (phase, rest): (Vec<&String>, Vec<&String>) = remaining.into_iter().partition(|name| {
                self.get_dependencies(name)
                    .iter()
                    .all(|dep| done.contains(dep.as_str()))
            });
            if phase.is_empty() {
                // Unreachable for a validated graph.
                break;
            }
            done.extend(phase.iter().copied().map(String::as_str));
            phases.push(phase.into_iter().cloned().collect());
            remaining = rest;
        }

        phases
    }

    fn detect_cycles(&self) -> Result<(), DecompositionError> {
        let mut visited = HashSet::new();
        let mut rec_stack = Vec::new();

        for name in &self.order {
            if !visited.contains(name.as_str()) {
                self.dfs_detect_cycle(name, &mut visited, &mut rec_stack)?;
            }
        }
        Ok(())
    }

    fn dfs_detect_cycle<'a>(
        &'a self,
        name: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut Vec<&'a str>,
    ) -> Result<(), DecompositionError> {
        visited.insert(name);
        rec_stack.push(name);

        for dep in self.get_dependencies(name) {
            if let Some(start) = rec_stack.iter().position(|on_stack| *on_stack == dep.as_str()) {
                let mut path: Vec<&str> = rec_stack[start..].to_vec();
                path.push(dep);
                return Err(DecompositionError::Cycle(path.join(" -> ")));
            }
            if !visited.contains(dep.as_str()) {
                self.dfs_detect_cycle(dep, visited, rec_stack)?;
            }
        }

        rec_stack.pop();
        Ok(())
    }
}

/// Materialize validated specs as subtasks of `task_id`.
///
/// Sequence numbers are drawn from `next_sequence`, which is shared across
/// the coordinator so creation order is global. Subtasks without
/// dependencies start `Ready`, the rest `Blocked`.
pub fn build_subtasks(
    task_id: TaskId,
    specs: Vec<SubtaskSpec>,
    dag: &TaskDag,
    next_sequence: &mut u64,
) -> Vec<Subtask> {
    let ids: HashMap<String, SubtaskId> = specs
        .iter()
        .map(|spec| (spec.name.clone(), SubtaskId::new()))
        .collect();

    specs
        .into_iter()
        .filter_map(|spec| {
            let id = *ids.get(&spec.name)?;
            let dependencies: Vec<SubtaskId> = dag
                .get_dependencies(&spec.name)
                .iter()
                .filter_map(|dep| ids.get(dep).copied())
                .collect();
            let status = if dependencies.is_empty() {
                SubtaskStatus::Ready
            } else {
                SubtaskStatus::Blocked
            };
            let sequence = *next_sequence;
            *next_sequence += 1;

            Some(Subtask {
                id,
                task_id,
                name: spec.name,
                capability: spec.capability,
                input: spec.input,
                dependencies,
                assigned_agent: None,
                status,
                result: None,
                summary: None,
                retry_count: 0,
                attempts: 0,
                sequence,
                last_error: None,
            })
        })
        .collect()
}

/// Whether a subtask may be dispatched: every dependency is completed and
/// it is not already assigned or terminal.
pub fn is_eligible(task: &Task, subtask: &Subtask) -> bool {
    matches!(subtask.status, SubtaskStatus::Ready | SubtaskStatus::Blocked)
        && subtask.dependencies.iter().all(|dep| {
            task.subtasks
                .iter()
                .any(|s| s.id == *dep && s.status == SubtaskStatus::Completed)
        })
}

/// Blocked subtasks of `task` that became eligible, in creation order
pub fn newly_ready(task: &Task) -> Vec<SubtaskId> {
    task.subtasks
        .iter()
        .filter(|s| s.status == SubtaskStatus::Blocked && is_eligible(task, s))
        .map(|s| s.id)
        .collect()
}

/// Every subtask that depends on `id`, directly or transitively, in
/// creation order
pub fn transitive_dependents(task: &Task, id: SubtaskId) -> Vec<SubtaskId> {
    let mut found: HashSet<SubtaskId> = HashSet::new();
    let mut queue = VecDeque::from([id]);

    while let Some(current) = queue.pop_front() {
        for subtask in &task.subtasks {
            if subtask.dependencies.contains(&current) && found.insert(subtask.id) {
                queue.push_back(subtask.id);
            }
        }
    }

    task.subtasks
        .iter()
        .filter(|s| found.contains(&s.id))
        .map(|s| s.id)
        .collect()
}

/// Entry of the ready queue.
///
/// Ordering is descending task priority, then ascending creation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadyEntry {
    priority: Reverse<i32>,
    sequence: u64,
    /// Parent task
    pub task_id: TaskId,
    /// Ready subtask
    pub subtask_id: SubtaskId,
}

impl ReadyEntry {
    /// Create an entry
    pub fn new(priority: i32, sequence: u64, task_id: TaskId, subtask_id: SubtaskId) -> Self {
        Self {
            priority: Reverse(priority),
            sequence,
            task_id,
            subtask_id,
        }
    }

    /// Entry for `subtask` of `task`
    pub fn for_subtask(task: &Task, subtask: &Subtask) -> Self {
        Self::new(task.priority, subtask.sequence, task.id, subtask.id)
    }

    /// Priority of the parent task
    pub fn priority(&self) -> i32 {
        self.priority.0
    }

    /// Creation sequence of the subtask
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Ready subtasks across all tasks of a coordinator, in dispatch order
#[derive(Debug, Clone, Default)]
pub struct ReadyQueue {
    entries: BTreeSet<ReadyEntry>,
}

impl ReadyQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry
    pub fn push(&mut self, entry: ReadyEntry) {
        self.entries.insert(entry);
    }

    /// Remove an entry, returning whether it was queued
    pub fn remove(&mut self, entry: &ReadyEntry) -> bool {
        self.entries.remove(entry)
    }

    /// Drop every entry of a task
    pub fn remove_task(&mut self, task_id: TaskId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.task_id != task_id);
        before - self.entries.len()
    }

    /// Entries in dispatch order
    pub fn iter(&self) -> impl Iterator<Item = &ReadyEntry> {
        self.entries.iter()
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
