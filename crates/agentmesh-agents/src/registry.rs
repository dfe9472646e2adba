//! Agent registry: registration records, health and selection

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use agentmesh_common::CircuitState;
use chrono::Utc;
use tracing::{debug, info};

use crate::{
    agents::Agent,
    error::{CoordinatorError, Result},
    metrics::PerformanceMetrics,
    models::{AgentId, AgentRecord, AgentStatus},
};

/// Request to register an agent
#[derive(Clone)]
pub struct AgentRegistration {
    /// The agent
    pub agent: Arc<dyn Agent>,
    /// Capabilities to register under instead of the agent's own
    pub capabilities: Option<BTreeSet<String>>,
    /// Upper bound on in-flight subtasks
    pub max_load: Option<usize>,
}

impl AgentRegistration {
    /// Register `agent` with its declared capabilities and no load limit
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            capabilities: None,
            max_load: None,
        }
    }

    /// Override the capability set
    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.capabilities = Some(capabilities.into_iter().map(Into::into).collect());
        self
    }

    /// Limit in-flight subtasks
    pub fn with_max_load(mut self, max_load: usize) -> Self {
        self.max_load = Some(max_load.max(1));
        self
    }
}

struct RegisteredAgent {
    agent: Arc<dyn Agent>,
    record: AgentRecord,
}

/// Registered agents of one coordinator.
///
/// The registry is not synchronized itself; the coordinator owns it inside
/// its scheduling lock, which makes load counters single-writer.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentId, RegisteredAgent>,
    capability_map: HashMap<String, Vec<AgentId>>,
    order: Vec<AgentId>,
}

fn derived_status(current: AgentStatus, circuit: CircuitState) -> AgentStatus {
    match (current, circuit) {
        (AgentStatus::Disabled, _) => AgentStatus::Disabled,
        (_, CircuitState::Open) => AgentStatus::Degraded,
        _ => AgentStatus::Active,
    }
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent and return its id
    pub fn register(&mut self, registration: AgentRegistration) -> Result<AgentId> {
        let agent = registration.agent;
        let capabilities = registration
            .capabilities
            .unwrap_or_else(|| agent.capabilities());
        if capabilities.is_empty() {
            return Err(CoordinatorError::invalid_input(format!(
                "agent {} declares no capabilities",
                agent.name()
            )));
        }

        let id = AgentId::new();
        let record = AgentRecord {
            id,
            name: agent.name().to_string(),
            capabilities: capabilities.clone(),
            load: 0,
            max_load: registration.max_load,
            status: derived_status(AgentStatus::Active, agent.circuit_state()),
            metrics: PerformanceMetrics::default(),
            registered_at: Utc::now(),
        };

        for capability in &capabilities {
            self.capability_map
                .entry(capability.clone())
                .or_default()
                .push(id);
        }
        self.order.push(id);
        info!(agent_id = %id, agent_name = %record.name, capabilities = ?capabilities, "Agent registered");
        self.agents.insert(id, RegisteredAgent { agent, record });

        Ok(id)
    }

    /// Remove an agent. Attempts already dispatched to it run to completion.
    pub fn deregister(&mut self, id: AgentId) -> Result<AgentRecord> {
        let entry = self
            .agents
            .remove(&id)
            .ok_or_else(|| CoordinatorError::agent_not_found(id))?;

        for capability in &entry.record.capabilities {
            if let Some(ids) = self.capability_map.get_mut(capability) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.capability_map.remove(capability);
                }
            }
        }
        self.order.retain(|other| *other != id);
        info!(agent_id = %id, agent_name = %entry.record.name, "Agent deregistered");

        Ok(entry.record)
    }

    /// Registration record of an agent
    pub fn get(&self, id: AgentId) -> Option<&AgentRecord> {
        self.agents.get(&id).map(|entry| &entry.record)
    }

    /// The agent itself
    pub fn agent(&self, id: AgentId) -> Option<Arc<dyn Agent>> {
        self.agents.get(&id).map(|entry| Arc::clone(&entry.agent))
    }

    /// Whether any registered agent declares `capability`, healthy or not
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capability_map.contains_key(capability)
    }

    /// Pick the active, capable agent with the lowest load.
    ///
    /// Health is re-derived from each candidate's breaker first. Ties go to
    /// the earliest registration. Returns `None` when no agent qualifies.
    pub fn select(&mut self, capability: &str) -> Option<(AgentId, Arc<dyn Agent>)> {
        let candidates = self.capability_map.get(capability)?.clone();

        let mut best: Option<(AgentId, usize)> = None;
        for id in candidates {
            self.refresh_health(id);
            let Some(entry) = self.agents.get(&id) else {
                continue;
            };
            let record = &entry.record;
            if record.status != AgentStatus::Active || !record.has_capacity() {
                continue;
            }
            if best.map_or(true, |(_, load)| record.load < load) {
                best = Some((id, record.load));
            }
        }

        best.and_then(|(id, _)| self.agent(id).map(|agent| (id, agent)))
    }

    /// Count a dispatched subtask against an agent
    pub fn acquire(&mut self, id: AgentId) {
        if let Some(entry) = self.agents.get_mut(&id) {
            entry.record.load += 1;
            debug!(agent_id = %id, load = entry.record.load, "Agent load increased");
        }
    }

    /// Release a finished attempt and fold it into the agent's metrics.
    ///
    /// `outcome` is `None` for cancelled attempts, which do not count
    /// towards performance.
    pub fn release(&mut self, id: AgentId, outcome: Option<(bool, Duration)>) {
        let Some(entry) = self.agents.get_mut(&id) else {
            return;
        };
        entry.record.load = entry.record.load.saturating_sub(1);
        if let Some((success, latency)) = outcome {
            entry.record.metrics.record(success, latency);
        }
        debug!(agent_id = %id, load = entry.record.load, "Agent load decreased");
        self.refresh_health(id);
    }

    /// Re-derive `active`/`degraded` from the agent's breaker
    pub fn refresh_health(&mut self, id: AgentId) {
        if let Some(entry) = self.agents.get_mut(&id) {
            let next = derived_status(entry.record.status, entry.agent.circuit_state());
            if next != entry.record.status {
                info!(
                    agent_id = %id,
                    agent_name = %entry.record.name,
                    from = ?entry.record.status,
                    to = ?next,
                    "Agent health changed"
                );
                entry.record.status = next;
            }
        }
    }

    /// Operator override. Setting `Active` or `Degraded` clears a disable
    /// and re-derives health from the breaker.
    pub fn set_status(&mut self, id: AgentId, status: AgentStatus) -> Result<()> {
        let entry = self
            .agents
            .get_mut(&id)
            .ok_or_else(|| CoordinatorError::agent_not_found(id))?;
        entry.record.status = match status {
            AgentStatus::Disabled => AgentStatus::Disabled,
            _ => derived_status(AgentStatus::Active, entry.agent.circuit_state()),
        };
        info!(agent_id = %id, status = ?entry.record.status, "Agent status set");
        Ok(())
    }

    /// Records in registration order
    pub fn records(&self) -> Vec<AgentRecord> {
        self.order
            .iter()
            .filter_map(|id| self.agents.get(id).map(|entry| entry.record.clone()))
            .collect()
    }

    /// Number of registered agents
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agents are registered
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
