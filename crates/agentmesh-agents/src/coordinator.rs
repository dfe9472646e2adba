//! Agent coordinator: task lifecycle, DAG scheduling and retries
//!
//! Tasks move `pending -> decomposing -> in_progress` and end `completed`,
//! `partial` or `failed`. A pool of workers pulls ready subtasks in priority
//! order, dispatches them to the least loaded capable agent and applies the
//! outcome. All scheduling state lives behind one short-lived lock that is
//! never held across an await; agent calls happen outside it. Lifecycle
//! records are queued under the lock and written by a single writer task,
//! so shared memory sees them in the order they were produced.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use agentmesh_common::{noop_sink, EventRecord, SharedSink};
use agentmesh_config::MeshConfig;
use agentmesh_memory::{MemoryItemType, ReadOutcome, ScopedMemory};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    agents::{Agent, AgentContext},
    decomposition::Decomposer,
    error::{CoordinatorError, Result},
    executor::{ExecutionOutcome, ExecutionReport, SubtaskExecutor},
    metrics::{CoordinatorStats, SUBTASK_COMPLETED_EVENT, SUBTASK_FAILED_EVENT, TASK_FINISHED_EVENT},
    models::{
        AgentId, AgentInput, AgentRecord, AgentStatus, FailureCause, SubtaskFailure, SubtaskId,
        SubtaskStatus, Task, TaskId, TaskRequest, TaskStatus,
    },
    registry::{AgentRegistration, AgentRegistry},
    scheduler::{build_subtasks, is_eligible, newly_ready, transitive_dependents, ReadyEntry, ReadyQueue, TaskDag},
    synthesis::{MergeSynthesizer, ResultSynthesizer},
};

/// Coordinator tuning
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Workers pulling from the ready queue
    pub max_concurrent_subtasks: usize,
    /// Time allowed for a whole task
    pub task_timeout: Duration,
    /// Time allowed for one attempt
    pub subtask_timeout: Duration,
    /// Retries of a failed subtask before it fails terminally
    pub max_retries: u32,
    /// Share of completed subtasks needed for a `partial` rather than
    /// `failed` outcome
    pub min_completion_ratio: f64,
    /// Rescheduling interval when no agent was available
    pub tick: Duration,
    /// How long a finished task stays in memory before only its persisted
    /// snapshot remains
    pub task_retention: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_subtasks: 8,
            task_timeout: Duration::from_secs(300),
            subtask_timeout: Duration::from_secs(60),
            max_retries: 2,
            min_completion_ratio: 0.5,
            tick: Duration::from_millis(50),
            task_retention: Duration::from_secs(3600),
        }
    }
}

impl CoordinatorConfig {
    /// Set the worker count
    pub fn with_max_concurrent_subtasks(mut self, workers: usize) -> Self {
        self.max_concurrent_subtasks = workers.max(1);
        self
    }

    /// Set the task timeout
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Set the attempt timeout
    pub fn with_subtask_timeout(mut self, timeout: Duration) -> Self {
        self.subtask_timeout = timeout;
        self
    }

    /// Set the retry limit
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the minimum completion ratio, clamped to 0.0..=1.0
    pub fn with_min_completion_ratio(mut self, ratio: f64) -> Self {
        self.min_completion_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Set the scheduling tick
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Set how long finished tasks are kept in memory
    pub fn with_task_retention(mut self, retention: Duration) -> Self {
        self.task_retention = retention;
        self
    }
}

impl From<&MeshConfig> for CoordinatorConfig {
    fn from(config: &MeshConfig) -> Self {
        Self {
            max_concurrent_subtasks: config.network.max_concurrent_subtasks.max(1),
            task_timeout: config.network.task_timeout(),
            subtask_timeout: config.network.subtask_timeout(),
            max_retries: config.scheduler.max_retries,
            min_completion_ratio: config.scheduler.min_completion_ratio,
            tick: Duration::from_millis(config.scheduler.tick_ms.max(1)),
            task_retention: Duration::from_secs(config.scheduler.task_retention_secs),
        }
    }
}

/// Final status of a task whose subtasks are all terminal
pub fn completion_status(completed: usize, total: usize, min_completion_ratio: f64) -> TaskStatus {
    if completed == total {
        TaskStatus::Completed
    } else if completed > 0 && completed as f64 / total as f64 >= min_completion_ratio {
        TaskStatus::Partial
    } else {
        TaskStatus::Failed
    }
}

struct TaskEntry {
    task: Task,
    cancel: CancellationToken,
    status: watch::Sender<TaskStatus>,
}

impl TaskEntry {
    fn set_status(&mut self, status: TaskStatus) {
        self.task.status = status;
        self.status.send_replace(status);
    }
}

#[derive(Default)]
struct CoordinatorState {
    tasks: HashMap<TaskId, TaskEntry>,
    registry: AgentRegistry,
    ready: ReadyQueue,
    next_sequence: u64,
    stats: CoordinatorStats,
}

impl CoordinatorState {
    /// Drop finished tasks older than `retention`. Returns how many went.
    fn evict_finished(&mut self, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let cutoff = Utc::now() - retention;
        let before = self.tasks.len();
        self.tasks.retain(|_, entry| {
            !(entry.task.status.is_terminal() && entry.task.completed_at.is_some_and(|at| at <= cutoff))
        });
        before - self.tasks.len()
    }
}

struct Job {
    task_id: TaskId,
    subtask_id: SubtaskId,
    agent_id: AgentId,
    agent: Arc<dyn Agent>,
    input: AgentInput,
    cancel: CancellationToken,
}

fn snapshot_name(task_id: TaskId) -> String {
    format!("task/{}", task_id)
}

enum LifecycleMessage {
    Record {
        name: String,
        value: Value,
        item_type: MemoryItemType,
    },
    Flush(oneshot::Sender<()>),
}

/// Ordered queue of lifecycle records bound for shared memory.
///
/// Records are sent while the state lock is held, so their order matches
/// the order of the state changes they describe. One task drains the queue
/// and writes them one at a time.
struct LifecycleWriter {
    sender: Mutex<Option<mpsc::UnboundedSender<LifecycleMessage>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleWriter {
    fn spawn(memory: ScopedMemory) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_lifecycle(receiver, memory));
        Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        }
    }

    fn send(&self, message: LifecycleMessage) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    fn snapshot(&self, task: &Task) {
        match serde_json::to_value(task) {
            Ok(value) => {
                let record = LifecycleMessage::Record {
                    name: snapshot_name(task.id),
                    value,
                    item_type: MemoryItemType::Context,
                };
                if !self.send(record) {
                    debug!(task_id = %task.id, "Lifecycle writer closed, snapshot skipped");
                }
            }
            Err(err) => warn!(task_id = %task.id, error = %err, "Failed to serialize task snapshot"),
        }
    }

    fn fact(&self, name: String, value: Value) {
        let record = LifecycleMessage::Record {
            name,
            value,
            item_type: MemoryItemType::Fact,
        };
        if !self.send(record) {
            debug!("Lifecycle writer closed, fact skipped");
        }
    }

    /// Wait until every record queued so far has been written
    async fn flush(&self) {
        let (done, written) = oneshot::channel();
        if self.send(LifecycleMessage::Flush(done)) {
            let _ = written.await;
        }
    }

    /// Stop accepting records and wait for the queue to drain
    async fn close(&self) {
        self.sender.lock().take();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "Lifecycle writer ended abnormally");
            }
        }
    }
}

async fn write_lifecycle(mut receiver: mpsc::UnboundedReceiver<LifecycleMessage>, memory: ScopedMemory) {
    while let Some(message) = receiver.recv().await {
        match message {
            LifecycleMessage::Record { name, value, item_type } => {
                match memory.put(name.as_str(), value, item_type, None).await {
                    Ok(outcome) if !outcome.is_stored() => {
                        debug!(key = %name, "Lifecycle record not persisted")
                    }
                    Ok(_) => {}
                    Err(err) => warn!(key = %name, error = %err, "Failed to persist lifecycle record"),
                }
            }
            LifecycleMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

struct CoordinatorInner {
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    work: Notify,
    decomposer: Arc<dyn Decomposer>,
    synthesizer: Arc<dyn ResultSynthesizer>,
    memory: ScopedMemory,
    lifecycle: LifecycleWriter,
    sink: SharedSink,
    executor: SubtaskExecutor,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Builder for [`AgentCoordinator`]
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    decomposer: Arc<dyn Decomposer>,
    synthesizer: Arc<dyn ResultSynthesizer>,
    memory: ScopedMemory,
    sink: SharedSink,
}

impl CoordinatorBuilder {
    /// Set the configuration
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the result synthesizer (default: [`MergeSynthesizer`])
    pub fn synthesizer(mut self, synthesizer: Arc<dyn ResultSynthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    /// Publish events to `sink`
    pub fn sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Build the coordinator and start its workers.
    ///
    /// Must be called within a tokio runtime. Call
    /// [`AgentCoordinator::shutdown`] to stop the workers.
    pub fn build(self) -> AgentCoordinator {
        let workers = self.config.max_concurrent_subtasks.max(1);
        let inner = Arc::new(CoordinatorInner {
            executor: SubtaskExecutor::new(self.config.subtask_timeout),
            config: self.config,
            state: Mutex::new(CoordinatorState::default()),
            work: Notify::new(),
            decomposer: self.decomposer,
            synthesizer: self.synthesizer,
            lifecycle: LifecycleWriter::spawn(self.memory.clone()),
            memory: self.memory,
            sink: self.sink,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::with_capacity(workers)),
        });

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker| tokio::spawn(Arc::clone(&inner).worker_loop(worker)))
            .collect();
        inner.workers.lock().extend(handles);
        info!(workers, scope = %inner.memory.scope(), "Coordinator started");

        AgentCoordinator { inner }
    }
}

/// Orchestrates decomposition, scheduling and synthesis for one network.
/// Cheap to clone.
#[derive(Clone)]
pub struct AgentCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl AgentCoordinator {
    /// Start building a coordinator that decomposes with `decomposer` and
    /// keeps lifecycle records in `memory`
    pub fn builder(decomposer: Arc<dyn Decomposer>, memory: ScopedMemory) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config: CoordinatorConfig::default(),
            decomposer,
            synthesizer: Arc::new(MergeSynthesizer),
            memory,
            sink: noop_sink(),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Shared memory scope of this coordinator
    pub fn memory(&self) -> &ScopedMemory {
        &self.inner.memory
    }

    /// Accept a task. Completion is asynchronous; poll
    /// [`get_task_status`](Self::get_task_status) or
    /// [`subscribe`](Self::subscribe).
    pub async fn submit_task(&self, request: TaskRequest) -> Result<TaskId> {
        if self.inner.shutdown.is_cancelled() {
            return Err(CoordinatorError::ShuttingDown);
        }
        if request.description.trim().is_empty() {
            return Err(CoordinatorError::invalid_input("task description must not be empty"));
        }

        let task = Task::new(request);
        let task_id = task.id;
        let cancel = self.inner.shutdown.child_token();

        {
            let mut state = self.inner.state.lock();
            let evicted = state.evict_finished(self.inner.config.task_retention);
            if evicted > 0 {
                debug!(evicted, "Finished tasks evicted");
            }
            info!(task_id = %task_id, priority = task.priority, "Task submitted");
            self.inner.lifecycle.snapshot(&task);
            state.tasks.insert(
                task_id,
                TaskEntry {
                    task,
                    cancel: cancel.clone(),
                    status: watch::channel(TaskStatus::Pending).0,
                },
            );
            state.stats.tasks_submitted += 1;
        }

        let inner = Arc::clone(&self.inner);
        let timeout = self.inner.config.task_timeout;
        let timer_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer_cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let message = format!("task timed out after {}ms", timeout.as_millis());
                    inner.abort_task(task_id, FailureCause::Timeout, message).await;
                }
            }
        });

        tokio::spawn(Arc::clone(&self.inner).decompose(task_id));

        Ok(task_id)
    }

    /// Latest known state of a task still held in memory. Finished tasks
    /// past their retention are only available through
    /// [`load_task`](Self::load_task).
    pub fn get_task_status(&self, task_id: TaskId) -> Result<Task> {
        self.inner
            .state
            .lock()
            .tasks
            .get(&task_id)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| CoordinatorError::task_not_found(task_id))
    }

    /// Synthesized result, once the task is completed or partial
    pub fn get_task_result(&self, task_id: TaskId) -> Result<Option<Value>> {
        self.inner
            .state
            .lock()
            .tasks
            .get(&task_id)
            .map(|entry| entry.task.result.clone())
            .ok_or_else(|| CoordinatorError::task_not_found(task_id))
    }

    /// Receiver of a task's status changes
    pub fn subscribe(&self, task_id: TaskId) -> Result<watch::Receiver<TaskStatus>> {
        self.inner
            .state
            .lock()
            .tasks
            .get(&task_id)
            .map(|entry| entry.status.subscribe())
            .ok_or_else(|| CoordinatorError::task_not_found(task_id))
    }

    /// Latest known state of a task, falling back to its persisted
    /// snapshot once it has been evicted
    pub async fn load_task(&self, task_id: TaskId) -> Result<Task> {
        match self.get_task_status(task_id) {
            Err(CoordinatorError::TaskNotFound(_)) => {}
            found => return found,
        }

        self.inner.lifecycle.flush().await;
        match self.inner.memory.get(snapshot_name(task_id)).await {
            Ok(ReadOutcome::Available(Some(item))) => serde_json::from_value(item.value)
                .map_err(|err| CoordinatorError::HistoryUnavailable(err.to_string())),
            Ok(ReadOutcome::Available(None)) => Err(CoordinatorError::task_not_found(task_id)),
            Ok(ReadOutcome::Unavailable) => Err(CoordinatorError::HistoryUnavailable(
                "shared memory unavailable".to_string(),
            )),
            Err(err) => Err(CoordinatorError::HistoryUnavailable(err.to_string())),
        }
    }

    /// Wait until a task is terminal and return it
    pub async fn wait_for_task(&self, task_id: TaskId) -> Result<Task> {
        if let Ok(mut receiver) = self.subscribe(task_id) {
            // A closed channel means the task was evicted after finishing.
            let _ = receiver.wait_for(|status| status.is_terminal()).await;
        }
        self.load_task(task_id).await
    }

    /// Wait until every lifecycle record produced so far is in shared memory
    pub async fn flush(&self) {
        self.inner.lifecycle.flush().await;
    }

    /// Cancel a task. Non-terminal subtasks fail with `cancelled` and
    /// running attempts are signalled.
    pub async fn cancel_task(&self, task_id: TaskId) -> Result<()> {
        if !self.inner.state.lock().tasks.contains_key(&task_id) {
            return Err(CoordinatorError::task_not_found(task_id));
        }
        self.inner
            .abort_task(task_id, FailureCause::Cancelled, "task cancelled".to_string())
            .await;
        Ok(())
    }

    /// Register an agent
    pub fn register_agent(&self, registration: AgentRegistration) -> Result<AgentId> {
        let id = self.inner.state.lock().registry.register(registration)?;
        self.inner.work.notify_waiters();
        Ok(id)
    }

    /// Remove an agent
    pub fn deregister_agent(&self, agent_id: AgentId) -> Result<AgentRecord> {
        self.inner.state.lock().registry.deregister(agent_id)
    }

    /// Operator override of an agent's status
    pub fn set_agent_status(&self, agent_id: AgentId, status: AgentStatus) -> Result<()> {
        self.inner.state.lock().registry.set_status(agent_id, status)?;
        self.inner.work.notify_waiters();
        Ok(())
    }

    /// Registration record of one agent, health refreshed
    pub fn agent(&self, agent_id: AgentId) -> Option<AgentRecord> {
        let mut state = self.inner.state.lock();
        state.registry.refresh_health(agent_id);
        state.registry.get(agent_id).cloned()
    }

    /// Every registration record, health refreshed
    pub fn agents(&self) -> Vec<AgentRecord> {
        let mut state = self.inner.state.lock();
        let ids: Vec<AgentId> = state.registry.records().iter().map(|r| r.id).collect();
        for id in ids {
            state.registry.refresh_health(id);
        }
        state.registry.records()
    }

    /// Coordinator counters
    pub fn stats(&self) -> CoordinatorStats {
        self.inner.state.lock().stats.clone()
    }

    /// Whether any task is not yet terminal
    pub fn has_active_tasks(&self) -> bool {
        self.inner
            .state
            .lock()
            .tasks
            .values()
            .any(|entry| !entry.task.status.is_terminal())
    }

    /// Cancel every unfinished task and stop the workers
    pub async fn shutdown(&self) {
        let active: Vec<TaskId> = self
            .inner
            .state
            .lock()
            .tasks
            .values()
            .filter(|entry| !entry.task.status.is_terminal())
            .map(|entry| entry.task.id)
            .collect();
        for task_id in active {
            self.inner
                .abort_task(task_id, FailureCause::Cancelled, "coordinator shut down".to_string())
                .await;
        }

        self.inner.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.inner.workers.lock().drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "Coordinator worker ended abnormally");
            }
        }
        self.inner.lifecycle.close().await;
        info!(scope = %self.inner.memory.scope(), "Coordinator stopped");
    }
}

impl CoordinatorInner {
    async fn worker_loop(self: Arc<Self>, worker: usize) {
        debug!(worker, "Coordinator worker started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let notified = self.work.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.next_job() {
                self.run_job(job).await;
                continue;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.config.tick) => {}
            }
        }
        debug!(worker, "Coordinator worker stopped");
    }

    /// Take the first ready subtask that has an available agent and mark it
    /// assigned. Subtasks with no available agent stay queued.
    fn next_job(&self) -> Option<Job> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let entries: Vec<ReadyEntry> = state.ready.iter().copied().collect();

        for ready in entries {
            let Some(entry) = state.tasks.get(&ready.task_id) else {
                state.ready.remove(&ready);
                continue;
            };
            let Some(subtask) = entry.task.subtasks.iter().find(|s| s.id == ready.subtask_id) else {
                state.ready.remove(&ready);
                continue;
            };
            if entry.task.status.is_terminal() || !is_eligible(&entry.task, subtask) {
                state.ready.remove(&ready);
                continue;
            }

            let Some((agent_id, agent)) = state.registry.select(&subtask.capability) else {
                continue;
            };

            let dependency_results: BTreeMap<String, Value> = entry
                .task
                .subtasks
                .iter()
                .filter(|s| subtask.dependencies.contains(&s.id))
                .map(|s| (s.name.clone(), s.result.clone().unwrap_or(Value::Null)))
                .collect();

            state.ready.remove(&ready);
            state.registry.acquire(agent_id);
            state.stats.dispatched += 1;

            let Some(entry) = state.tasks.get_mut(&ready.task_id) else {
                continue;
            };
            let task_description = entry.task.description.clone();
            let task_context = entry.task.context.clone();
            let cancel = entry.cancel.clone();
            let Some(subtask) = entry.task.subtasks.iter_mut().find(|s| s.id == ready.subtask_id) else {
                continue;
            };
            subtask.status = SubtaskStatus::Assigned;
            subtask.assigned_agent = Some(agent_id);
            subtask.attempts += 1;

            debug!(
                task_id = %ready.task_id,
                subtask = %subtask.name,
                agent_id = %agent_id,
                attempt = subtask.attempts,
                "Subtask dispatched"
            );

            let input = AgentInput {
                task_id: ready.task_id,
                subtask_id: subtask.id,
                name: subtask.name.clone(),
                capability: subtask.capability.clone(),
                payload: subtask.input.clone(),
                task_description,
                task_context,
                dependency_results,
                attempt: subtask.attempts,
            };

            return Some(Job {
                task_id: ready.task_id,
                subtask_id: ready.subtask_id,
                agent_id,
                agent,
                input,
                cancel,
            });
        }

        None
    }

    async fn run_job(&self, job: Job) {
        let context = AgentContext::new(job.cancel.clone(), self.memory.clone());
        let report = self
            .executor
            .run(Arc::clone(&job.agent), job.input.clone(), context)
            .await;
        self.apply_report(&job, report);
        self.work.notify_waiters();
    }

    fn apply_report(&self, job: &Job, report: ExecutionReport) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let performance = match &report.outcome {
            ExecutionOutcome::Completed(_) => Some((true, report.duration)),
            ExecutionOutcome::Failed(_) | ExecutionOutcome::TimedOut => Some((false, report.duration)),
            ExecutionOutcome::Cancelled => None,
        };
        state.registry.release(job.agent_id, performance);

        let Some(entry) = state.tasks.get_mut(&job.task_id) else {
            return;
        };
        let Some(index) = entry.task.subtasks.iter().position(|s| s.id == job.subtask_id) else {
            return;
        };
        {
            let subtask = &entry.task.subtasks[index];
            if entry.task.status.is_terminal()
                || subtask.status != SubtaskStatus::Assigned
                || subtask.attempts != job.input.attempt
            {
                debug!(task_id = %job.task_id, subtask = %subtask.name, "Stale attempt result ignored");
                return;
            }
        }

        let duration_ms = report.duration.as_secs_f64() * 1000.0;
        match report.outcome {
            ExecutionOutcome::Completed(output) => {
                let priority = entry.task.priority;
                let subtask = &mut entry.task.subtasks[index];
                subtask.status = SubtaskStatus::Completed;
                subtask.result = Some(output.result.clone());
                subtask.summary = output.summary;
                subtask.last_error = None;
                self.lifecycle
                    .fact(format!("subtask/{}/{}", job.task_id, subtask.name), output.result);

                self.sink.emit(
                    EventRecord::new(SUBTASK_COMPLETED_EVENT, duration_ms)
                        .with_label("task", job.task_id)
                        .with_label("subtask", &subtask.name)
                        .with_label("agent", job.agent.name())
                        .with_label("attempt", subtask.attempts),
                );
                debug!(task_id = %job.task_id, subtask = %subtask.name, duration_ms, "Subtask completed");

                for id in newly_ready(&entry.task) {
                    if let Some(next) = entry.task.subtasks.iter_mut().find(|s| s.id == id) {
                        next.status = SubtaskStatus::Ready;
                        state.ready.push(ReadyEntry::new(priority, next.sequence, job.task_id, next.id));
                    }
                }
            }
            ExecutionOutcome::Failed(failure) => {
                let cause = if failure.is_retryable() {
                    FailureCause::Retryable
                } else {
                    FailureCause::Fatal
                };
                self.record_failure(state, job, index, cause, failure.message, duration_ms);
            }
            ExecutionOutcome::TimedOut => {
                state.stats.timeouts += 1;
                let message = format!("attempt timed out after {}ms", self.config.subtask_timeout.as_millis());
                self.record_failure(state, job, index, FailureCause::Timeout, message, duration_ms);
            }
            ExecutionOutcome::Cancelled => {
                self.record_failure(state, job, index, FailureCause::Cancelled, "attempt cancelled".to_string(), duration_ms);
            }
        }

        self.finalize_if_done(state, job.task_id);
    }

    fn record_failure(
        &self,
        state: &mut CoordinatorState,
        job: &Job,
        index: usize,
        cause: FailureCause,
        message: String,
        duration_ms: f64,
    ) {
        let Some(entry) = state.tasks.get_mut(&job.task_id) else {
            return;
        };
        let priority = entry.task.priority;
        let subtask = &mut entry.task.subtasks[index];
        subtask.last_error = Some(message.clone());

        let retryable = matches!(cause, FailureCause::Retryable | FailureCause::Timeout);
        let retrying = retryable && subtask.retry_count < self.config.max_retries;

        self.sink.emit(
            EventRecord::new(SUBTASK_FAILED_EVENT, duration_ms)
                .with_label("task", job.task_id)
                .with_label("subtask", &subtask.name)
                .with_label("agent", job.agent.name())
                .with_label("attempt", subtask.attempts)
                .with_label("cause", cause)
                .with_label("retrying", retrying),
        );

        if retrying {
            subtask.retry_count += 1;
            subtask.status = SubtaskStatus::Ready;
            state.ready.push(ReadyEntry::new(priority, subtask.sequence, job.task_id, subtask.id));
            state.stats.retries += 1;
            info!(
                task_id = %job.task_id,
                subtask = %subtask.name,
                retry = subtask.retry_count,
                error = %message,
                "Subtask attempt failed, retrying"
            );
            return;
        }

        subtask.status = SubtaskStatus::Failed;
        let failed_id = subtask.id;
        warn!(
            task_id = %job.task_id,
            subtask = %subtask.name,
            cause = %cause,
            attempts = subtask.attempts,
            error = %message,
            "Subtask failed"
        );
        let failure = SubtaskFailure {
            subtask_id: failed_id,
            name: subtask.name.clone(),
            cause,
            message,
            attempts: subtask.attempts,
        };
        entry.task.failures.push(failure);
        state.stats.propagated_failures += propagate_failure(&mut entry.task, failed_id);
    }

    fn finalize_if_done(&self, state: &mut CoordinatorState, task_id: TaskId) {
        let Some(entry) = state.tasks.get(&task_id) else {
            return;
        };
        let task = &entry.task;
        if task.status != TaskStatus::InProgress || !task.subtasks.iter().all(|s| s.status.is_terminal()) {
            return;
        }
        let status = completion_status(
            task.count(SubtaskStatus::Completed),
            task.subtasks.len(),
            self.config.min_completion_ratio,
        );
        self.finish(state, task_id, status);
    }

    fn finish(&self, state: &mut CoordinatorState, task_id: TaskId, status: TaskStatus) {
        let Some(entry) = state.tasks.get_mut(&task_id) else {
            return;
        };

        let total = entry.task.subtasks.len();
        let completed = entry.task.count(SubtaskStatus::Completed);
        if status == TaskStatus::Failed {
            if entry.task.error.is_none() {
                entry.task.error = Some(format!("{} of {} subtasks failed", total - completed, total));
            }
        } else {
            entry.task.result = Some(self.synthesizer.synthesize(&entry.task));
        }
        entry.task.completed_at = Some(Utc::now());
        entry.set_status(status);
        entry.cancel.cancel();
        state.ready.remove_task(task_id);

        match status {
            TaskStatus::Completed => state.stats.tasks_completed += 1,
            TaskStatus::Partial => state.stats.tasks_partial += 1,
            _ => state.stats.tasks_failed += 1,
        }

        let elapsed_ms = (Utc::now() - entry.task.created_at).num_milliseconds() as f64;
        if status == TaskStatus::Completed {
            info!(task_id = %task_id, subtasks = total, elapsed_ms, "Task completed");
        } else {
            warn!(
                task_id = %task_id,
                status = %status,
                completed,
                total,
                error = ?entry.task.error,
                "Task finished with failures"
            );
        }
        self.sink.emit(
            EventRecord::new(TASK_FINISHED_EVENT, elapsed_ms)
                .with_label("task", task_id)
                .with_label("status", status)
                .with_label("completed", completed)
                .with_label("total", total),
        );
        self.lifecycle.snapshot(&entry.task);

        let evicted = state.evict_finished(self.config.task_retention);
        if evicted > 0 {
            debug!(evicted, "Finished tasks evicted");
        }
    }

    async fn decompose(self: Arc<Self>, task_id: TaskId) {
        let (task, cancel) = {
            let mut state = self.state.lock();
            let Some(entry) = state.tasks.get_mut(&task_id) else {
                return;
            };
            if entry.task.status != TaskStatus::Pending {
                return;
            }
            entry.set_status(TaskStatus::Decomposing);
            (entry.task.clone(), entry.cancel.clone())
        };
        debug!(task_id = %task_id, "Decomposing task");

        let planned = tokio::select! {
            _ = cancel.cancelled() => return,
            planned = self.decomposer.decompose(&task) => planned,
        };
        let planned = planned.and_then(|specs| {
            let dag = TaskDag::from_specs(&specs)?;
            Ok((specs, dag))
        });

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(entry) = state.tasks.get_mut(&task_id) else {
                return;
            };
            if entry.task.status != TaskStatus::Decomposing {
                return;
            }

            match planned {
                Err(err) => {
                    warn!(task_id = %task_id, error = %err, "Task decomposition failed");
                    entry.task.error = Some(CoordinatorError::from(err).to_string());
                    self.finish(state, task_id, TaskStatus::Failed);
                }
                Ok((specs, dag)) => {
                    entry.task.subtasks = build_subtasks(task_id, specs, &dag, &mut state.next_sequence);
                    entry.set_status(TaskStatus::InProgress);
                    info!(
                        task_id = %task_id,
                        subtasks = entry.task.subtasks.len(),
                        phases = dag.phases().len(),
                        "Task decomposed"
                    );
                    for subtask in entry.task.subtasks.iter().filter(|s| s.status == SubtaskStatus::Ready) {
                        state.ready.push(ReadyEntry::for_subtask(&entry.task, subtask));
                    }
                    self.lifecycle.snapshot(&entry.task);
                    self.finalize_if_done(state, task_id);
                }
            }
        }

        self.work.notify_waiters();
    }

    /// Fail every non-terminal subtask of a task with `cause` and finish it
    async fn abort_task(&self, task_id: TaskId, cause: FailureCause, message: String) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(entry) = state.tasks.get_mut(&task_id) else {
                return;
            };
            if entry.task.status.is_terminal() {
                return;
            }

            warn!(task_id = %task_id, cause = %cause, reason = %message, "Aborting task");
            if entry.task.status != TaskStatus::InProgress {
                entry.task.error = Some(message);
                self.finish(state, task_id, TaskStatus::Failed);
            } else {
                let mut failures = Vec::new();
                for subtask in entry.task.subtasks.iter_mut().filter(|s| !s.status.is_terminal()) {
                    subtask.status = SubtaskStatus::Failed;
                    subtask.last_error = Some(message.clone());
                    failures.push(SubtaskFailure {
                        subtask_id: subtask.id,
                        name: subtask.name.clone(),
                        cause,
                        message: message.clone(),
                        attempts: subtask.attempts,
                    });
                }
                entry.task.failures.extend(failures);
                if entry.task.error.is_none() {
                    entry.task.error = Some(message);
                }
                self.finalize_if_done(state, task_id);
            }
        }

        self.work.notify_waiters();
    }
}

/// Fail every non-terminal subtask that transitively depends on `failed`.
/// Returns how many were failed.
pub(crate) fn propagate_failure(task: &mut Task, failed: SubtaskId) -> u64 {
    let Some(failed_name) = task.subtasks.iter().find(|s| s.id == failed).map(|s| s.name.clone()) else {
        return 0;
    };

    let mut propagated = 0;
    for id in transitive_dependents(task, failed) {
        let Some(subtask) = task.subtasks.iter_mut().find(|s| s.id == id) else {
            continue;
        };
        if subtask.status.is_terminal() {
            continue;
        }
        subtask.status = SubtaskStatus::Failed;
        let message = format!("dependency {} failed", failed_name);
        subtask.last_error = Some(message.clone());
        debug!(subtask = %subtask.name, dependency = %failed_name, "Subtask failed by propagation");
        let failure = SubtaskFailure {
            subtask_id: subtask.id,
            name: subtask.name.clone(),
            cause: FailureCause::DependencyFailed,
            message,
            attempts: subtask.attempts,
        };
        task.failures.push(failure);
        propagated += 1;
    }
    propagated
}
