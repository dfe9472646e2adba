//! Core configuration types and data structures

use std::time::Duration;

use agentmesh_common::{CircuitBreakerConfig, LogSettings};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level mesh configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct MeshConfig {
    /// Per-network limits and lifetimes
    pub network: NetworkSettings,
    /// Scheduling and retry policy
    pub scheduler: SchedulerSettings,
    /// Circuit breaker defaults
    pub breaker: BreakerSettings,
    /// Shared memory store tuning
    pub memory: MemorySettings,
    /// Log output
    pub logging: LoggingSettings,
    /// Backend model providers, in declaration order
    pub providers: Vec<ProviderSettings>,
    /// Agents registered in every new network
    pub agents: Vec<AgentSettings>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkSettings {
    /// Subtasks allowed to run at once across the network
    pub max_concurrent_subtasks: usize,
    /// Global timeout for a task, in milliseconds
    pub task_timeout_ms: u64,
    /// Timeout for a single subtask attempt, in milliseconds
    pub subtask_timeout_ms: u64,
    /// Default TTL for memory items, in seconds
    pub memory_ttl_secs: u64,
    /// Idle period after which a network is reaped, in seconds
    pub idle_timeout_secs: u64,
    /// How often the idle reaper runs, in seconds
    pub reap_interval_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            max_concurrent_subtasks: 8,
            task_timeout_ms: 300_000,
            subtask_timeout_ms: 60_000,
            memory_ttl_secs: 3600,
            idle_timeout_secs: 1800,
            reap_interval_secs: 60,
        }
    }
}

impl NetworkSettings {
    /// Task timeout as a duration
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Subtask timeout as a duration
    pub fn subtask_timeout(&self) -> Duration {
        Duration::from_millis(self.subtask_timeout_ms)
    }

    /// Default memory TTL as a duration
    pub fn memory_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_ttl_secs)
    }

    /// Idle timeout as a duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Retries allowed per subtask after its first failed attempt
    pub max_retries: u32,
    /// Fraction of subtasks that must complete for a `partial` outcome
    pub min_completion_ratio: f64,
    /// Interval of the periodic scheduling pass, in milliseconds
    pub tick_ms: u64,
    /// Seconds a finished task stays in memory before only its persisted
    /// snapshot remains
    pub task_retention_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            min_completion_ratio: 0.5,
            tick_ms: 50,
            task_retention_secs: 3600,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures before a breaker opens
    pub failure_threshold: u32,
    /// Open period before a trial call, in milliseconds
    pub recovery_timeout_ms: u64,
    /// Error kinds that never trip a breaker
    pub excluded_kinds: Vec<String>,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            excluded_kinds: vec![agentmesh_common::RATE_LIMITED_KIND.to_string()],
        }
    }
}

impl From<&BreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        settings.excluded_kinds.iter().fold(
            CircuitBreakerConfig::new()
                .without_exclusions()
                .with_failure_threshold(settings.failure_threshold)
                .with_recovery_timeout(Duration::from_millis(settings.recovery_timeout_ms)),
            |config, kind| config.with_excluded_kind(kind.clone()),
        )
    }
}

/// Shared memory configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemorySettings {
    /// Values larger than this are compressed before storage
    pub compression_threshold_bytes: usize,
    /// Items fetched per backend page during a query
    pub query_page_size: usize,
    /// How often expired items are purged, in seconds
    pub sweep_interval_secs: u64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            compression_threshold_bytes: 4096,
            query_page_size: 32,
            sweep_interval_secs: 60,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level or filter directive
    pub level: String,
    /// JSON output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl From<&LoggingSettings> for LogSettings {
    fn from(settings: &LoggingSettings) -> Self {
        LogSettings {
            level: settings.level.clone(),
            json: settings.json,
            debug: false,
        }
    }
}

/// A backend model provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSettings {
    /// Unique provider id
    pub id: String,
    /// Generation endpoint URL
    pub endpoint: String,
    /// Priority rank, lower is tried first
    #[serde(default)]
    pub priority: u32,
    /// Cost charged per call
    #[serde(default)]
    pub cost_per_call: f64,
    /// Typical latency, in milliseconds
    #[serde(default)]
    pub expected_latency_ms: u64,
}

/// An agent registered in every network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSettings {
    /// Agent name, unique within a network
    pub name: String,
    /// Capability tags
    pub capabilities: Vec<String>,
    /// Provider ids this agent may use, empty for all
    #[serde(default)]
    pub providers: Vec<String>,
}

/// Configuration manager trait
pub trait ConfigLoader {
    /// Load configuration
    fn load_config(&self) -> Result<MeshConfig, ConfigError>;
    /// Save configuration
    fn save_config(&self, config: &MeshConfig) -> Result<(), ConfigError>;
    /// Validate configuration
    fn validate_config(&self, config: &MeshConfig) -> Result<(), ConfigError>;
}
