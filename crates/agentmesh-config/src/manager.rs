//! Configuration manager implementation

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use tracing::debug;

use crate::{
    error::{ConfigError, Result},
    types::{ConfigLoader, MeshConfig},
};

/// Default prefix for environment overrides (`AGENTMESH_SCHEDULER__MAX_RETRIES=3`)
pub const ENV_PREFIX: &str = "AGENTMESH";

/// Configuration manager
pub struct ConfigManager {
    /// Configuration file path
    config_path: PathBuf,
    /// Environment prefix
    env_prefix: String,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Create with custom config path
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            config_path: path,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Use a different environment prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Path the manager reads from and writes to
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Load, then validate
    pub fn load_validated(&self) -> Result<MeshConfig> {
        let config = self.load_config()?;
        self.validate_config(&config)?;
        Ok(config)
    }

    /// Get default config path
    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agentmesh")
            .join("config.toml")
    }
}

impl ConfigLoader for ConfigManager {
    fn load_config(&self) -> Result<MeshConfig> {
        debug!(path = %self.config_path.display(), "Loading configuration");

        let builder = Config::builder()
            .add_source(File::from(self.config_path.clone()).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        let mesh_config: MeshConfig = config.try_deserialize()?;
        Ok(mesh_config)
    }

    fn save_config(&self, config: &MeshConfig) -> Result<()> {
        let toml = toml::to_string(config)?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config_path, toml)?;
        debug!(path = %self.config_path.display(), "Configuration saved");
        Ok(())
    }

    fn validate_config(&self, config: &MeshConfig) -> Result<()> {
        if config.network.max_concurrent_subtasks == 0 {
            return Err(ConfigError::Validation(
                "network.max_concurrent_subtasks must be greater than 0".to_string(),
            ));
        }
        if config.network.task_timeout_ms == 0 || config.network.subtask_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "network timeouts must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&config.scheduler.min_completion_ratio) {
            return Err(ConfigError::Validation(format!(
                "scheduler.min_completion_ratio must be within 0.0..=1.0, got {}",
                config.scheduler.min_completion_ratio
            )));
        }
        if config.scheduler.tick_ms == 0 {
            return Err(ConfigError::Validation(
                "scheduler.tick_ms must be greater than 0".to_string(),
            ));
        }
        if config.breaker.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "breaker.failure_threshold must be greater than 0".to_string(),
            ));
        }
        if config.memory.query_page_size == 0 {
            return Err(ConfigError::Validation(
                "memory.query_page_size must be greater than 0".to_string(),
            ));
        }

        let mut provider_ids = HashSet::new();
        for provider in &config.providers {
            if provider.id.trim().is_empty() {
                return Err(ConfigError::Validation("provider id must not be empty".to_string()));
            }
            if provider.endpoint.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "provider '{}' has no endpoint",
                    provider.id
                )));
            }
            if provider.cost_per_call < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "provider '{}' has a negative cost",
                    provider.id
                )));
            }
            if !provider_ids.insert(provider.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate provider id '{}'",
                    provider.id
                )));
            }
        }

        let mut agent_names = HashSet::new();
        for agent in &config.agents {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::Validation("agent name must not be empty".to_string()));
            }
            if !agent_names.insert(agent.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate agent name '{}'",
                    agent.name
                )));
            }
            if agent.capabilities.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "agent '{}' declares no capabilities",
                    agent.name
                )));
            }
            if let Some(unknown) = agent
                .providers
                .iter()
                .find(|id| !provider_ids.contains(id.as_str()))
            {
                return Err(ConfigError::Validation(format!(
                    "agent '{}' references unknown provider '{}'",
                    agent.name, unknown
                )));
            }
        }

        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
