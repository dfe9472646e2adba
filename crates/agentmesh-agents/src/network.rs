//! Tenant networks and their lifecycle
//!
//! A [`MeshRuntime`] keeps one [`Network`] per tenant. A network is created
//! on the tenant's first task submission from a [`NetworkBlueprint`] and
//! reaped once it has been idle for the configured period with no running
//! tasks. Every network owns its coordinator, its breaker registry and a
//! memory scope, so independent networks never share mutable state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use agentmesh_common::{noop_sink, CircuitBreakerConfig, CircuitBreakerRegistry, SharedSink};
use agentmesh_config::{AgentSettings, MeshConfig};
use agentmesh_memory::{ScopedMemory, SharedMemoryStore};
use agentmesh_providers::{GenerateOptions, HttpProvider, ModelProvider, ProviderDescriptor, ProviderError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    agents::ModelAgent,
    coordinator::{AgentCoordinator, CoordinatorConfig},
    decomposition::{Decomposer, SingleStepDecomposer},
    error::{CoordinatorError, Result},
    models::{NetworkId, TaskId, TaskRequest},
    registry::AgentRegistration,
    synthesis::{MergeSynthesizer, ResultSynthesizer},
};

/// What a blueprint gets to build a tenant's network with
pub struct NetworkContext {
    /// Tenant
    pub tenant: String,
    /// Network being built
    pub network_id: NetworkId,
    /// Breakers of this network
    pub breakers: Arc<CircuitBreakerRegistry>,
    /// Memory scope of this network
    pub memory: ScopedMemory,
    /// Event sink
    pub sink: SharedSink,
}

/// Describes how to populate a new network
pub trait NetworkBlueprint: Send + Sync {
    /// Agents to register
    fn agents(&self, context: &NetworkContext) -> Vec<AgentRegistration>;

    /// Decomposition strategy
    fn decomposer(&self, context: &NetworkContext) -> Arc<dyn Decomposer>;

    /// Result synthesizer
    fn synthesizer(&self) -> Arc<dyn ResultSynthesizer> {
        Arc::new(MergeSynthesizer)
    }
}

/// Runtime tuning
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Coordinator settings for every network
    pub coordinator: CoordinatorConfig,
    /// Breaker settings for every network
    pub breaker: CircuitBreakerConfig,
    /// Idle period after which a network without running tasks is reaped
    pub idle_timeout: Duration,
    /// How often the reaper runs
    pub reap_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            idle_timeout: Duration::from_secs(1800),
            reap_interval: Duration::from_secs(60),
        }
    }
}

impl From<&MeshConfig> for RuntimeConfig {
    fn from(config: &MeshConfig) -> Self {
        Self {
            coordinator: CoordinatorConfig::from(config),
            breaker: CircuitBreakerConfig::from(&config.breaker),
            idle_timeout: config.network.idle_timeout(),
            reap_interval: Duration::from_secs(config.network.reap_interval_secs.max(1)),
        }
    }
}

/// One tenant's agents, tasks and memory
pub struct Network {
    id: NetworkId,
    tenant: String,
    coordinator: AgentCoordinator,
    breakers: Arc<CircuitBreakerRegistry>,
    created_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
}

impl Network {
    /// Identifier
    pub fn id(&self) -> NetworkId {
        self.id
    }

    /// Tenant
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// The network's coordinator
    pub fn coordinator(&self) -> &AgentCoordinator {
        &self.coordinator
    }

    /// The network's breakers
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Record activity now
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last recorded activity
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Whether the network may be reaped
    pub fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.idle_for() >= idle_timeout && !self.coordinator.has_active_tasks()
    }
}

/// Process-wide holder of tenant networks
pub struct MeshRuntime {
    networks: DashMap<String, Arc<Network>>,
    blueprint: Arc<dyn NetworkBlueprint>,
    store: SharedMemoryStore,
    config: RuntimeConfig,
    sink: SharedSink,
    shutdown: CancellationToken,
}

impl MeshRuntime {
    /// Create a runtime building networks from `blueprint`
    pub fn new(blueprint: Arc<dyn NetworkBlueprint>, store: SharedMemoryStore, config: RuntimeConfig) -> Self {
        Self {
            networks: DashMap::new(),
            blueprint,
            store,
            config,
            sink: noop_sink(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Publish events of every network to `sink`
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Submit a task for `tenant`, creating its network if needed
    pub async fn submit_task(&self, tenant: &str, request: TaskRequest) -> Result<TaskId> {
        let network = self.get_or_create_network(tenant)?;
        let task_id = network.coordinator().submit_task(request).await?;
        network.touch();
        Ok(task_id)
    }

    /// The tenant's network, created from the blueprint on first use.
    /// Looking a network up counts as activity.
    pub fn get_or_create_network(&self, tenant: &str) -> Result<Arc<Network>> {
        if self.shutdown.is_cancelled() {
            return Err(CoordinatorError::ShuttingDown);
        }
        if tenant.trim().is_empty() {
            return Err(CoordinatorError::invalid_input("tenant must not be empty"));
        }

        let entry = self
            .networks
            .entry(tenant.to_string())
            .or_try_insert_with(|| self.build_network(tenant))?;
        entry.touch();
        Ok(Arc::clone(entry.value()))
    }

    /// The tenant's network, if it exists
    pub fn network(&self, tenant: &str) -> Option<Arc<Network>> {
        self.networks.get(tenant).map(|entry| Arc::clone(entry.value()))
    }

    /// Tenants with a live network, sorted
    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.networks.iter().map(|entry| entry.key().clone()).collect();
        tenants.sort();
        tenants
    }

    /// Number of live networks
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Whether no network is live
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Remove networks idle longer than the idle timeout with no running
    /// tasks. Returns the reaped tenants.
    pub async fn reap_idle(&self) -> Vec<String> {
        let idle_timeout = self.config.idle_timeout;
        let candidates: Vec<String> = self
            .networks
            .iter()
            .filter(|entry| entry.value().is_idle(idle_timeout))
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = Vec::new();
        for tenant in candidates {
            let Some((tenant, network)) = self
                .networks
                .remove_if(&tenant, |_, network| network.is_idle(idle_timeout))
            else {
                continue;
            };
            info!(
                tenant = %tenant,
                network_id = %network.id(),
                idle_ms = network.idle_for().as_millis() as u64,
                "Reaping idle network"
            );
            network.coordinator().shutdown().await;
            reaped.push(tenant);
        }
        reaped
    }

    /// Run [`reap_idle`](Self::reap_idle) periodically until shutdown
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let runtime = Arc::clone(self);
        let interval = self.config.reap_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = runtime.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaped = runtime.reap_idle().await;
                        if !reaped.is_empty() {
                            debug!(count = reaped.len(), "Idle networks reaped");
                        }
                    }
                }
            }
        })
    }

    /// Shut down every network
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tenants: Vec<String> = self.networks.iter().map(|entry| entry.key().clone()).collect();
        for tenant in tenants {
            if let Some((_, network)) = self.networks.remove(&tenant) {
                network.coordinator().shutdown().await;
            }
        }
        info!("Mesh runtime stopped");
    }

    fn build_network(&self, tenant: &str) -> Result<Arc<Network>> {
        let network_id = NetworkId::new();
        let breakers = Arc::new(CircuitBreakerRegistry::with_config(
            self.config.breaker.clone(),
            Arc::clone(&self.sink),
        ));
        let context = NetworkContext {
            tenant: tenant.to_string(),
            network_id,
            breakers: Arc::clone(&breakers),
            memory: self.store.scoped(tenant),
            sink: Arc::clone(&self.sink),
        };

        let coordinator = AgentCoordinator::builder(self.blueprint.decomposer(&context), context.memory.clone())
            .config(self.config.coordinator.clone())
            .synthesizer(self.blueprint.synthesizer())
            .sink(Arc::clone(&self.sink))
            .build();

        for registration in self.blueprint.agents(&context) {
            let name = registration.agent.name().to_string();
            if let Err(err) = coordinator.register_agent(registration) {
                warn!(tenant = %tenant, agent = %name, error = %err, "Skipping agent");
            }
        }

        info!(tenant = %tenant, network_id = %network_id, "Network created");
        Ok(Arc::new(Network {
            id: network_id,
            tenant: tenant.to_string(),
            coordinator,
            breakers,
            created_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
        }))
    }
}

/// Blueprint that gives every network one [`ModelAgent`] per configured
/// agent, all sharing a provider pool
pub struct ModelAgentBlueprint {
    agents: Vec<AgentSettings>,
    providers: Vec<Arc<dyn ModelProvider>>,
    options: GenerateOptions,
    decomposer: Arc<dyn Decomposer>,
}

impl ModelAgentBlueprint {
    /// Create a blueprint. Tasks go whole to the first capability of the
    /// first agent until [`with_decomposer`](Self::with_decomposer) says
    /// otherwise.
    pub fn new(agents: Vec<AgentSettings>, providers: Vec<Arc<dyn ModelProvider>>) -> Self {
        let capability = agents
            .first()
            .and_then(|agent| agent.capabilities.first().cloned())
            .unwrap_or_else(|| "general".to_string());
        Self {
            agents,
            providers,
            options: GenerateOptions::default(),
            decomposer: Arc::new(SingleStepDecomposer::new(capability)),
        }
    }

    /// Build HTTP providers and agents from config
    pub fn from_config(config: &MeshConfig) -> std::result::Result<Self, ProviderError> {
        let providers = config
            .providers
            .iter()
            .map(|settings| {
                HttpProvider::new(ProviderDescriptor::from(settings))
                    .map(|provider| Arc::new(provider) as Arc<dyn ModelProvider>)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let options = GenerateOptions::default().with_timeout(config.network.subtask_timeout());
        Ok(Self::new(config.agents.clone(), providers).with_options(options))
    }

    /// Set generation options for every agent
    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the decomposition strategy
    pub fn with_decomposer(mut self, decomposer: Arc<dyn Decomposer>) -> Self {
        self.decomposer = decomposer;
        self
    }
}

impl NetworkBlueprint for ModelAgentBlueprint {
    fn agents(&self, context: &NetworkContext) -> Vec<AgentRegistration> {
        self.agents
            .iter()
            .map(|settings| {
                let agent = ModelAgent::from_settings(
                    settings,
                    &self.providers,
                    Arc::clone(&context.breakers),
                    Arc::clone(&context.sink),
                )
                .with_options(self.options.clone());
                AgentRegistration::new(Arc::new(agent))
            })
            .collect()
    }

    fn decomposer(&self, _context: &NetworkContext) -> Arc<dyn Decomposer> {
        Arc::clone(&self.decomposer)
    }
}
