//! AgentMesh: coordination core for networks of cooperating agents
//!
//! Re-exports the workspace crates under one roof:
//!
//! - [`common`]: circuit breakers, observability events, tracing setup
//! - [`config`]: layered configuration
//! - [`providers`]: model providers and the fallback chain
//! - [`memory`]: the scoped shared memory store
//! - [`agents`]: agent contract, scheduler, coordinator and tenant networks

pub use agentmesh_agents as agents;
pub use agentmesh_common as common;
pub use agentmesh_config as config;
pub use agentmesh_memory as memory;
pub use agentmesh_providers as providers;
