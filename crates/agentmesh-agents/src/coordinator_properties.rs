//! Property-based tests for end-to-end task execution

#[cfg(test)]
mod tests {
    use crate::agents::{Agent, AgentContext};
    use crate::coordinator::{completion_status, AgentCoordinator, CoordinatorConfig};
    use crate::decomposition::PlanDecomposer;
    use crate::models::{AgentFailure, AgentInput, AgentOutput, FailureCause, SubtaskStatus, TaskRequest, TaskStatus};
    use crate::registry::AgentRegistration;
    use crate::scheduler::SubtaskSpec;
    use agentmesh_memory::{InMemoryBackend, SharedMemoryStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::collections::{BTreeSet, HashMap, HashSet};
    use std::sync::Arc;
    use std::time::Duration;

    struct PlanAgent {
        plan: HashMap<String, Vec<String>>,
        fatal: HashSet<String>,
        seen: Mutex<Vec<String>>,
        violations: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Agent for PlanAgent {
        fn name(&self) -> &str {
            "plan"
        }

        fn capabilities(&self) -> BTreeSet<String> {
            BTreeSet::from(["x".to_string()])
        }

        async fn process_task(&self, input: AgentInput, _context: AgentContext) -> Result<AgentOutput, AgentFailure> {
            self.seen.lock().push(input.name.clone());
            let deps = self.plan.get(&input.name).cloned().unwrap_or_default();
            if deps.iter().any(|dep| !input.dependency_results.contains_key(dep)) {
                self.violations.lock().push(input.name.clone());
            }
            if self.fatal.contains(&input.name) {
                return Err(AgentFailure::fatal("scripted"));
            }
            Ok(AgentOutput::new(serde_json::json!(input.name)))
        }
    }

    fn arb_case() -> impl Strategy<Value = (Vec<SubtaskSpec>, HashSet<usize>)> {
        (1usize..7).prop_flat_map(|n| {
            (
                prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..3), n),
                prop::collection::hash_set(0..n, 0..3),
            )
                .prop_map(|(edges, fatal)| {
                    let specs = edges
                        .iter()
                        .enumerate()
                        .map(|(i, picks)| {
                            let mut spec = SubtaskSpec::new(format!("s{}", i), "x");
                            if i > 0 {
                                for pick in picks {
                                    spec = spec.depends_on(format!("s{}", pick.index(i)));
                                }
                            }
                            spec
                        })
                        .collect();
                    (specs, fatal)
                })
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// Subtasks only run once their dependencies are done, failed
        /// subtasks never have running dependents, and the final status
        /// follows the completion ratio.
        #[test]
        fn prop_plan_runs_to_consistent_end((specs, fatal) in arb_case()) {
            let plan: HashMap<String, Vec<String>> = specs
                .iter()
                .map(|s| (s.name.clone(), s.depends_on.clone()))
                .collect();
            let agent = Arc::new(PlanAgent {
                plan,
                fatal: fatal.iter().map(|i| format!("s{}", i)).collect(),
                seen: Mutex::new(Vec::new()),
                violations: Mutex::new(Vec::new()),
            });
            let total = specs.len();

            let task = tokio_test::block_on(async {
                let memory = SharedMemoryStore::with_defaults(Arc::new(InMemoryBackend::new())).scoped("prop");
                let coordinator = AgentCoordinator::builder(Arc::new(PlanDecomposer::new(specs)), memory)
                    .config(
                        CoordinatorConfig::default()
                            .with_tick(Duration::from_millis(5))
                            .with_max_concurrent_subtasks(3),
                    )
                    .build();
                coordinator
                    .register_agent(AgentRegistration::new(agent.clone() as Arc<dyn Agent>).with_max_load(3))
                    .unwrap();
                let task_id = coordinator.submit_task(TaskRequest::new("prop")).await.unwrap();
                let task = coordinator.wait_for_task(task_id).await.unwrap();
                coordinator.shutdown().await;
                task
            });

            prop_assert!(agent.violations.lock().is_empty());

            let seen = agent.seen.lock().clone();
            let unique: HashSet<&String> = seen.iter().collect();
            prop_assert_eq!(unique.len(), seen.len());

            let completed = task.count(SubtaskStatus::Completed);
            prop_assert_eq!(completed + task.count(SubtaskStatus::Failed), total);
            prop_assert_eq!(task.status, completion_status(completed, total, 0.5));
            if fatal.is_empty() {
                prop_assert_eq!(task.status, TaskStatus::Completed);
            }
            for failure in &task.failures {
                let ran = seen.contains(&failure.name);
                match failure.cause {
                    FailureCause::Fatal => prop_assert!(ran && agent.fatal.contains(&failure.name)),
                    FailureCause::DependencyFailed => prop_assert!(!ran),
                    other => prop_assert!(false, "unexpected cause {}", other),
                }
            }
        }
    }
}
