//! Agent mesh configuration
//!
//! Loads a [`MeshConfig`] from an optional TOML file layered under
//! `AGENTMESH_*` environment variables, validates it, and converts its
//! sections into the typed configs runtime components take.

pub mod error;
pub mod manager;
pub mod types;

pub use error::{ConfigError, Result};
pub use manager::{ConfigManager, ENV_PREFIX};
pub use types::{
    AgentSettings, BreakerSettings, ConfigLoader, LoggingSettings, MemorySettings, MeshConfig,
    NetworkSettings, ProviderSettings, SchedulerSettings,
};
