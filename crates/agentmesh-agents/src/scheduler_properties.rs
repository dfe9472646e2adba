//! Property-based tests for DAG validation, eligibility and failure
//! propagation

#[cfg(test)]
mod tests {
    use crate::coordinator::propagate_failure;
    use crate::error::DecompositionError;
    use crate::models::{SubtaskStatus, Task, TaskRequest};
    use crate::scheduler::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    /// Acyclic plans: node `i` may only depend on nodes `< i`.
    fn arb_plan() -> impl Strategy<Value = Vec<SubtaskSpec>> {
        (1usize..10)
            .prop_flat_map(|n| {
                prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..3), n)
            })
            .prop_map(|edges| {
                edges
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
                    .collect()
            })
    }

    fn task_for(specs: &[SubtaskSpec]) -> Task {
        let dag = TaskDag::from_specs(specs).unwrap();
        let mut task = Task::new(TaskRequest::new("prop"));
        let mut sequence = 0;
        task.subtasks = build_subtasks(task.id, specs.to_vec(), &dag, &mut sequence);
        task
    }

    proptest! {
        /// Every node lands in exactly one phase, after all of its
        /// dependencies.
        #[test]
        fn prop_phases_respect_dependencies(specs in arb_plan()) {
            let dag = TaskDag::from_specs(&specs).unwrap();
            let phases = dag.phases();

            let mut placed: HashSet<String> = HashSet::new();
            for phase in &phases {
                for name in phase {
                    for dep in dag.get_dependencies(name) {
                        prop_assert!(placed.contains(dep));
                    }
                }
                for name in phase {
                    prop_assert!(placed.insert(name.clone()));
                }
            }
            prop_assert_eq!(placed.len(), specs.len());
        }

        /// Closing a back edge onto any node turns a valid plan into a
        /// cycle.
        #[test]
        fn prop_back_edge_is_cycle(specs in arb_plan(), pick in any::<prop::sample::Index>()) {
            let last = specs.len() - 1;
            let target = pick.index(specs.len());
            let mut specs = specs;
            let chain_end = format!("s{}", last);
            // Make s{last} reachable from s{target}, then close the loop.
            if target != last {
                specs[last] = specs[last].clone().depends_on(format!("s{}", target));
                specs[target] = specs[target].clone().depends_on(chain_end);
                let is_cycle = matches!(TaskDag::from_specs(&specs), Err(DecompositionError::Cycle(_)));
                prop_assert!(is_cycle);
            } else {
                specs[last] = specs[last].clone().depends_on(chain_end);
                prop_assert_eq!(
                    TaskDag::from_specs(&specs).unwrap_err(),
                    DecompositionError::SelfDependency(format!("s{}", last))
                );
            }
        }

        /// Running a plan to the end in eligibility order never dispatches a
        /// subtask whose dependency failed, and every subtask ends terminal.
        #[test]
        fn prop_failures_never_dispatch_dependents(
            specs in arb_plan(),
            failing in prop::collection::hash_set(0usize..10, 0..4),
        ) {
            let mut task = task_for(&specs);
            let mut dispatched: Vec<String> = Vec::new();

            loop {
                let Some(next) = task
                    .subtasks
                    .iter()
                    .filter(|s| is_eligible(&task, s))
                    .min_by_key(|s| s.sequence)
                    .map(|s| s.id)
                else {
                    break;
                };

                let index = task.subtasks.iter().position(|s| s.id == next).unwrap();
                let subtask = &task.subtasks[index];
                for dep in &subtask.dependencies {
                    let status = task.subtasks.iter().find(|s| s.id == *dep).unwrap().status;
                    prop_assert_eq!(status, SubtaskStatus::Completed);
                }
                dispatched.push(subtask.name.clone());

                let fails = failing.contains(&(subtask.sequence as usize));
                task.subtasks[index].status = if fails {
                    SubtaskStatus::Failed
                } else {
                    SubtaskStatus::Completed
                };
                if fails {
                    propagate_failure(&mut task, next);
                }
                for id in newly_ready(&task) {
                    if let Some(s) = task.subtasks.iter_mut().find(|s| s.id == id) {
                        s.status = SubtaskStatus::Ready;
                    }
                }
            }

            for subtask in &task.subtasks {
                prop_assert!(subtask.status.is_terminal());
            }
            let unique: HashSet<&String> = dispatched.iter().collect();
            prop_assert_eq!(unique.len(), dispatched.len());
        }

        /// The ready queue pops strictly by priority, then creation order.
        #[test]
        fn prop_ready_queue_order(entries in prop::collection::vec((-3i32..3, 0u64..100), 1..20)) {
            let task = Task::new(TaskRequest::new("q"));
            let mut queue = ReadyQueue::default();
            for (priority, sequence) in &entries {
                queue.push(ReadyEntry::new(*priority, *sequence, task.id, crate::models::SubtaskId::new()));
            }

            let popped: Vec<(i32, u64)> = queue.iter().map(|e| (e.priority(), e.sequence())).collect();
            for pair in popped.windows(2) {
                let (p1, s1) = pair[0];
                let (p2, s2) = pair[1];
                prop_assert!(p1 > p2 || (p1 == p2 && s1 <= s2));
            }
        }
    }
}
