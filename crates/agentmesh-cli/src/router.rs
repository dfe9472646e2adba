//! Argument parsing and command dispatch

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::{Command, ConfigAction, ConfigCommand, RunCommand, RunOptions};
use crate::error::CliResult;

/// AgentMesh - run tasks on a mesh of cooperating agents
#[derive(Parser, Debug)]
#[command(name = "agentmesh")]
#[command(bin_name = "agentmesh")]
#[command(about = "Run tasks on a mesh of cooperating agents")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (default: platform config dir)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Submit one task and print its report
    #[command(about = "Submit a task to a tenant network and wait for the result")]
    Run {
        /// Task description
        #[arg(short, long)]
        description: String,

        /// Tenant whose network runs the task
        #[arg(short, long, default_value = "default")]
        tenant: String,

        /// Task priority, higher runs first
        #[arg(short, long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,

        /// Capability the task is dispatched to
        #[arg(long)]
        capability: Option<String>,

        /// JSON context attached to the task
        #[arg(long, value_name = "JSON")]
        context: Option<String>,
    },

    /// Inspect configuration
    #[command(about = "View and initialize agentmesh configuration")]
    Config {
        #[command(subcommand)]
        action: ConfigSubcommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Routes parsed arguments to command handlers
pub struct CommandRouter;

impl CommandRouter {
    /// Parse process arguments and execute
    pub async fn route() -> CliResult<()> {
        Self::dispatch(Cli::parse()).await
    }

    /// Execute parsed arguments
    pub async fn dispatch(cli: Cli) -> CliResult<()> {
        match cli.command {
            Commands::Run {
                description,
                tenant,
                priority,
                capability,
                context,
            } => {
                RunCommand::new(RunOptions {
                    config: cli.config,
                    verbose: cli.verbose,
                    json_logs: cli.json_logs,
                    tenant,
                    description,
                    priority,
                    capability,
                    context,
                })
                .execute()
                .await
            }
            Commands::Config { action } => {
                let action = match action {
                    ConfigSubcommand::Show => ConfigAction::Show,
                    ConfigSubcommand::Path => ConfigAction::Path,
                    ConfigSubcommand::Init { force } => ConfigAction::Init { force },
                };
                ConfigCommand::new(action, cli.config).execute().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "agentmesh",
            "run",
            "--description",
            "summarize",
            "--tenant",
            "acme",
            "--priority",
            "-2",
            "--capability",
            "summary",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                description,
                tenant,
                priority,
                capability,
                context,
            } => {
                assert_eq!(description, "summarize");
                assert_eq!(tenant, "acme");
                assert_eq!(priority, -2);
                assert_eq!(capability.as_deref(), Some("summary"));
                assert!(context.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_global_path() {
        let cli = Cli::try_parse_from(["agentmesh", "config", "show", "--config", "/tmp/mesh.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/mesh.toml")));
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigSubcommand::Show
            }
        ));
    }
}
