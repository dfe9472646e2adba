//! Request, result and accounting types for model generation

use std::time::Duration;

use agentmesh_common::CircuitState;
use agentmesh_config::ProviderSettings;
use serde::{Deserialize, Serialize};

/// Static description of a backend provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Unique provider id
    pub id: String,
    /// Endpoint the provider talks to
    pub endpoint: String,
    /// Priority rank, lower is tried first
    pub priority: u32,
    /// Cost charged per successful call
    pub cost_per_call: f64,
    /// Typical latency
    pub expected_latency: Duration,
}

impl ProviderDescriptor {
    /// Create a descriptor with zero cost and latency
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>, priority: u32) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            priority,
            cost_per_call: 0.0,
            expected_latency: Duration::ZERO,
        }
    }

    /// Set per-call cost
    pub fn with_cost(mut self, cost_per_call: f64) -> Self {
        self.cost_per_call = cost_per_call;
        self
    }

    /// Set expected latency
    pub fn with_expected_latency(mut self, latency: Duration) -> Self {
        self.expected_latency = latency;
        self
    }
}

impl From<&ProviderSettings> for ProviderDescriptor {
    fn from(settings: &ProviderSettings) -> Self {
        ProviderDescriptor::new(&settings.id, &settings.endpoint, settings.priority)
            .with_cost(settings.cost_per_call)
            .with_expected_latency(Duration::from_millis(settings.expected_latency_ms))
    }
}

/// Per-call generation options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Upper bound on generated tokens
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Per-provider call timeout
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl GenerateOptions {
    /// Set the per-provider timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// What happened when the chain reached one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The provider's breaker refused the call; no request was made
    Skipped {
        /// Breaker state at the time
        state: CircuitState,
    },
    /// The provider was called and failed
    Failed {
        /// Error kind
        kind: String,
        /// Error message
        message: String,
    },
    /// The provider produced the output
    Succeeded,
}

/// One step of a chain call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Provider id
    pub provider_id: String,
    /// Position in the chain
    pub provider_index: usize,
    /// Outcome
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// A successful generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    /// Provider that served the call
    pub provider_id: String,
    /// Position of that provider in the chain
    pub provider_index: usize,
    /// Generated text
    pub text: String,
    /// Latency of the successful call
    pub latency: Duration,
    /// Cost charged for the call
    pub cost: f64,
    /// Every provider reached, in order
    pub attempts: Vec<Attempt>,
}

/// Result of a chain call. Exhaustion is a value, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    /// A provider produced output
    Success(Generation),
    /// Every provider was skipped or failed
    Unavailable {
        /// Every provider reached, in order
        attempts: Vec<Attempt>,
    },
    /// The caller cancelled before any provider succeeded
    Cancelled {
        /// Providers reached before cancellation
        attempts: Vec<Attempt>,
    },
}

impl GenerationResult {
    /// Whether a provider succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationResult::Success(_))
    }

    /// Generated text, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            GenerationResult::Success(generation) => Some(&generation.text),
            _ => None,
        }
    }

    /// Every provider reached, in order
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            GenerationResult::Success(generation) => &generation.attempts,
            GenerationResult::Unavailable { attempts } | GenerationResult::Cancelled { attempts } => {
                attempts
            }
        }
    }

    /// Take the successful generation
    pub fn into_generation(self) -> Option<Generation> {
        match self {
            GenerationResult::Success(generation) => Some(generation),
            _ => None,
        }
    }
}

/// Cumulative usage of one provider within a chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    /// Provider id
    pub provider_id: String,
    /// Calls actually made
    pub calls: u64,
    /// Calls that succeeded
    pub successes: u64,
    /// Calls that failed
    pub failures: u64,
    /// Times the breaker skipped this provider
    pub skipped: u64,
    /// Sum of per-call cost over successes
    pub total_cost: f64,
    /// Sum of latency over successes
    pub total_latency: Duration,
}

impl ProviderUsage {
    /// Average latency of successful calls
    pub fn average_latency(&self) -> Duration {
        if self.successes == 0 {
            Duration::ZERO
        } else {
            self.total_latency / self.successes as u32
        }
    }
}
