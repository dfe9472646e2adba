//! AgentMesh command-line front end
//!
//! `agentmesh run` submits one task to a tenant network built from
//! configuration and prints the task report as JSON. `agentmesh config`
//! shows, locates or initializes the configuration file.

pub mod commands;
pub mod error;
pub mod output;
pub mod router;

pub use error::{CliError, CliResult};
pub use router::{Cli, CommandRouter};
