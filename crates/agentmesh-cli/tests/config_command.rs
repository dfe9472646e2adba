use agentmesh_cli::commands::{Command, ConfigAction, ConfigCommand};
use agentmesh_cli::router::{Cli, CommandRouter};
use clap::Parser;
use tempfile::TempDir;

#[tokio::test]
async fn test_config_init_through_router() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("mesh.toml");
    let path_arg = path.to_string_lossy().to_string();

    let cli = Cli::try_parse_from(["agentmesh", "--config", &path_arg, "config", "init"]).unwrap();
    CommandRouter::dispatch(cli).await.unwrap();
    assert!(path.exists());

    let cli = Cli::try_parse_from(["agentmesh", "--config", &path_arg, "config", "init"]).unwrap();
    assert!(CommandRouter::dispatch(cli).await.is_err());
}

#[tokio::test]
async fn test_show_uses_file_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mesh.toml");
    std::fs::write(&path, "[scheduler]\nmax_retries = 7\n").unwrap();

    let command = ConfigCommand::new(ConfigAction::Show, Some(path.clone()));
    assert!(command.render().unwrap().contains("max_retries = 7"));
    command.execute().await.unwrap();
}
