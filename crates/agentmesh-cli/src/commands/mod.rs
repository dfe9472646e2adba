//! Command handlers

pub mod config;
pub mod run;

pub use config::{ConfigAction, ConfigCommand};
pub use run::{RunCommand, RunOptions, TaskReport};

use crate::error::CliResult;

/// Trait for command handlers
#[async_trait::async_trait]
pub trait Command: Send + Sync {
    /// Execute the command
    async fn execute(&self) -> CliResult<()>;
}

/// Config manager for an optional explicit path
pub(crate) fn config_manager(path: Option<&std::path::Path>) -> agentmesh_config::ConfigManager {
    match path {
        Some(path) => agentmesh_config::ConfigManager::with_path(path.to_path_buf()),
        None => agentmesh_config::ConfigManager::new(),
    }
}
