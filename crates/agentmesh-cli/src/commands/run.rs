//! `agentmesh run`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agentmesh_agents::{
    MeshRuntime, ModelAgentBlueprint, RuntimeConfig, SingleStepDecomposer, SubtaskFailure, TaskId, TaskRequest,
    TaskStatus,
};
use agentmesh_common::{init_tracing, CircuitBreaker, CircuitBreakerConfig, LogSettings, SharedSink, TracingSink};
use agentmesh_config::MeshConfig;
use agentmesh_memory::{spawn_sweeper, InMemoryBackend, MemoryConfig, SharedMemoryStore, STORE_DEPENDENCY};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{config_manager, Command};
use crate::error::{CliError, CliResult};
use crate::output;

/// Arguments of `agentmesh run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config: Option<PathBuf>,
    pub verbose: bool,
    pub json_logs: bool,
    pub tenant: String,
    pub description: String,
    pub priority: i32,
    pub capability: Option<String>,
    pub context: Option<String>,
}

/// What `run` prints once the task is terminal
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub tenant: String,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub failures: Vec<SubtaskFailure>,
}

/// Submit one task and wait for it
pub struct RunCommand {
    options: RunOptions,
}

impl RunCommand {
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    fn log_settings(&self, config: &MeshConfig) -> LogSettings {
        LogSettings {
            level: if self.options.verbose {
                "debug".to_string()
            } else {
                config.logging.level.clone()
            },
            json: self.options.json_logs || config.logging.json,
            debug: self.options.verbose,
        }
    }

    fn request(&self) -> CliResult<TaskRequest> {
        let context = match &self.options.context {
            Some(raw) => serde_json::from_str(raw).map_err(|e| CliError::InvalidArgument {
                message: format!("--context is not valid JSON: {}", e),
            })?,
            None => serde_json::Value::Null,
        };
        Ok(TaskRequest::new(self.options.description.clone())
            .with_priority(self.options.priority)
            .with_context(context))
    }
}

/// Shared memory store configured from `config`
pub fn build_store(config: &MeshConfig, sink: SharedSink) -> SharedMemoryStore {
    let breaker = CircuitBreaker::with_sink(STORE_DEPENDENCY, CircuitBreakerConfig::from(&config.breaker), sink);
    SharedMemoryStore::new(
        Arc::new(InMemoryBackend::new()),
        Arc::new(breaker),
        MemoryConfig::from_settings(&config.memory, &config.network),
    )
}

/// Runtime whose networks hold one model agent per configured agent
pub fn build_runtime(
    config: &MeshConfig,
    store: SharedMemoryStore,
    capability: Option<&str>,
    sink: SharedSink,
) -> CliResult<MeshRuntime> {
    if config.agents.is_empty() {
        return Err(CliError::Config("no [[agents]] configured".to_string()));
    }
    if config.providers.is_empty() {
        return Err(CliError::Config("no [[providers]] configured".to_string()));
    }

    let mut blueprint = ModelAgentBlueprint::from_config(config)?;
    if let Some(capability) = capability {
        blueprint = blueprint.with_decomposer(Arc::new(SingleStepDecomposer::new(capability)));
    }
    Ok(MeshRuntime::new(Arc::new(blueprint), store, RuntimeConfig::from(config)).with_sink(sink))
}

#[async_trait::async_trait]
impl Command for RunCommand {
    async fn execute(&self) -> CliResult<()> {
        let config = config_manager(self.options.config.as_deref()).load_validated()?;
        init_tracing(&self.log_settings(&config))?;

        let request = self.request()?;
        let sink: SharedSink = Arc::new(TracingSink);
        let store = build_store(&config, Arc::clone(&sink));
        let runtime = Arc::new(build_runtime(
            &config,
            store.clone(),
            self.options.capability.as_deref(),
            sink,
        )?);

        let background = CancellationToken::new();
        let sweeper = spawn_sweeper(
            store,
            Duration::from_secs(config.memory.sweep_interval_secs),
            background.clone(),
        );
        let reaper = runtime.spawn_reaper();

        let network = runtime.get_or_create_network(&self.options.tenant)?;
        let task_id = network.coordinator().submit_task(request).await?;
        info!(tenant = %self.options.tenant, task_id = %task_id, "Task submitted");

        let task = tokio::select! {
            task = network.coordinator().wait_for_task(task_id) => task?,
            _ = tokio::signal::ctrl_c() => {
                warn!(task_id = %task_id, "Interrupted, cancelling task");
                network.coordinator().cancel_task(task_id).await?;
                network.coordinator().load_task(task_id).await?
            }
        };

        background.cancel();
        runtime.shutdown().await;
        let _ = tokio::join!(sweeper, reaper);

        let report = TaskReport {
            task_id,
            tenant: self.options.tenant.clone(),
            status: task.status,
            result: task.result,
            error: task.error,
            failures: task.failures,
        };
        output::print_json(&report)?;

        if report.status == TaskStatus::Failed {
            return Err(CliError::Task(
                report.error.unwrap_or_else(|| "too few subtasks completed".to_string()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_common::noop_sink;
    use agentmesh_config::{AgentSettings, ProviderSettings};

    fn config_with_agent() -> MeshConfig {
        let mut config = MeshConfig::default();
        config.agents.push(AgentSettings {
            name: "writer".to_string(),
            capabilities: vec!["write".to_string()],
            providers: vec![],
        });
        config.providers.push(ProviderSettings {
            id: "local".to_string(),
            endpoint: "http://127.0.0.1:9/generate".to_string(),
            priority: 0,
            cost_per_call: 0.0,
            expected_latency_ms: 0,
        });
        config
    }

    #[test]
    fn test_request_parses_context() {
        let command = RunCommand::new(RunOptions {
            description: "go".to_string(),
            priority: 3,
            context: Some(r#"{"doc": "a"}"#.to_string()),
            ..RunOptions::default()
        });
        let request = command.request().unwrap();
        assert_eq!(request.priority, 3);
        assert_eq!(request.context["doc"], "a");

        let command = RunCommand::new(RunOptions {
            context: Some("{not json".to_string()),
            ..RunOptions::default()
        });
        assert!(matches!(command.request(), Err(CliError::InvalidArgument { .. })));
    }

    #[test]
    fn test_verbose_overrides_level() {
        let command = RunCommand::new(RunOptions {
            verbose: true,
            ..RunOptions::default()
        });
        let settings = command.log_settings(&MeshConfig::default());
        assert_eq!(settings.level, "debug");
        assert!(settings.debug);
    }

    #[test]
    fn test_runtime_requires_agents_and_providers() {
        let config = MeshConfig::default();
        let store = build_store(&config, noop_sink());
        assert!(matches!(
            build_runtime(&config, store, None, noop_sink()),
            Err(CliError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_runtime_networks_get_configured_agents() {
        let config = config_with_agent();
        let store = build_store(&config, noop_sink());
        let runtime = build_runtime(&config, store, Some("write"), noop_sink()).unwrap();

        let network = runtime.get_or_create_network("acme").unwrap();
        let agents = network.coordinator().agents();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].name, "writer");
        runtime.shutdown().await;
    }
}
