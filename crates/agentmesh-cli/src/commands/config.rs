//! `agentmesh config`

use std::path::PathBuf;

use agentmesh_config::{ConfigLoader, MeshConfig};

use super::{config_manager, Command};
use crate::error::{CliError, CliResult};

/// Config subcommand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the file path
    Path,
    /// Write defaults
    Init {
        /// Overwrite an existing file
        force: bool,
    },
}

/// Inspect or initialize configuration
pub struct ConfigCommand {
    pub action: ConfigAction,
    pub path: Option<PathBuf>,
}

impl ConfigCommand {
    pub fn new(action: ConfigAction, path: Option<PathBuf>) -> Self {
        Self { action, path }
    }

    /// Effective configuration rendered as TOML
    pub fn render(&self) -> CliResult<String> {
        let config = config_manager(self.path.as_deref()).load_validated()?;
        toml::to_string_pretty(&config).map_err(|e| CliError::Internal(e.to_string()))
    }

    /// Write the default configuration, returning where it went
    pub fn init(&self, force: bool) -> CliResult<PathBuf> {
        let manager = config_manager(self.path.as_deref());
        let path = manager.path().to_path_buf();
        if path.exists() && !force {
            return Err(CliError::Config(format!(
                "{} already exists, pass --force to overwrite",
                path.display()
            )));
        }
        manager.save_config(&MeshConfig::default())?;
        Ok(path)
    }
}

#[async_trait::async_trait]
impl Command for ConfigCommand {
    async fn execute(&self) -> CliResult<()> {
        match &self.action {
            ConfigAction::Show => print!("{}", self.render()?),
            ConfigAction::Path => println!("{}", config_manager(self.path.as_deref()).path().display()),
            ConfigAction::Init { force } => {
                let path = self.init(*force)?;
                println!("Wrote {}", path.display());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_then_show() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mesh.toml");
        let command = ConfigCommand::new(ConfigAction::Init { force: false }, Some(path.clone()));

        assert_eq!(command.init(false).unwrap(), path);
        assert!(path.exists());
        assert!(matches!(command.init(false), Err(CliError::Config(_))));
        assert!(command.init(true).is_ok());

        let rendered = command.render().unwrap();
        assert!(rendered.contains("[scheduler]"));
        assert!(rendered.contains("max_retries"));
    }

    #[test]
    fn test_show_rejects_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mesh.toml");
        std::fs::write(&path, "[network]\nmax_concurrent_subtasks = 0\n").unwrap();

        let command = ConfigCommand::new(ConfigAction::Show, Some(path));
        assert!(matches!(command.render(), Err(CliError::Config(_))));
    }
}
