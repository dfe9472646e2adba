//! Agent backed by a model fallback chain

use std::collections::BTreeSet;
use std::sync::Arc;

use agentmesh_common::{CallError, CircuitBreaker, CircuitBreakerRegistry, CircuitState, FailureKind, SharedSink};
use agentmesh_config::AgentSettings;
use agentmesh_memory::{MemoryFilter, MemoryItem, MemoryItemType, QueryOrder, ReadOutcome};
use agentmesh_providers::{FallbackChain, GenerateOptions, Generation, GenerationResult, ModelProvider};
use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use super::{Agent, AgentContext};
use crate::models::{AgentFailure, AgentInput, AgentOutput};

/// Breaker dependency name for an agent's fallback chain
pub const MODEL_CHAIN_DEPENDENCY: &str = "fallback_chain";

const CANCELLED_KIND: &str = "cancelled";
const DEFAULT_FACT_LIMIT: usize = 5;
const SUMMARY_CHARS: usize = 120;

#[derive(Debug, Error)]
enum ChainFailure {
    #[error("every model provider is unavailable")]
    Exhausted,
    #[error("generation cancelled")]
    Cancelled,
}

impl FailureKind for ChainFailure {
    fn failure_kind(&self) -> &str {
        match self {
            ChainFailure::Exhausted => "unavailable",
            ChainFailure::Cancelled => CANCELLED_KIND,
        }
    }
}

/// Agent that answers subtasks with a model.
///
/// Each attempt reads the most relevant facts of its network, calls the
/// fallback chain through the agent's own breaker and records the answer
/// as a decision item. An exhausted chain is a retryable failure.
pub struct ModelAgent {
    name: String,
    capabilities: BTreeSet<String>,
    chain: Arc<FallbackChain>,
    breaker: Arc<CircuitBreaker>,
    options: GenerateOptions,
    fact_limit: usize,
}

impl ModelAgent {
    /// Create an agent whose breaker comes from `breakers`
    pub fn new(
        name: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
        chain: Arc<FallbackChain>,
        breakers: &CircuitBreakerRegistry,
    ) -> Self {
        let name = name.into();
        let breaker = breakers.get(MODEL_CHAIN_DEPENDENCY, &name).unwrap_or_else(|| {
            let config = breakers.default_config().clone().with_excluded_kind(CANCELLED_KIND);
            breakers.register(MODEL_CHAIN_DEPENDENCY, &name, config)
        });

        Self {
            name,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            chain,
            breaker,
            options: GenerateOptions::default(),
            fact_limit: DEFAULT_FACT_LIMIT,
        }
    }

    /// Build an agent from its config entry.
    ///
    /// `providers` is the full provider pool; an empty provider list in the
    /// settings selects all of them.
    pub fn from_settings(
        settings: &AgentSettings,
        providers: &[Arc<dyn ModelProvider>],
        breakers: Arc<CircuitBreakerRegistry>,
        sink: SharedSink,
    ) -> Self {
        let selected = providers
            .iter()
            .filter(|p| settings.providers.is_empty() || settings.providers.iter().any(|id| id == p.id()))
            .cloned();

        let chain = FallbackChain::builder(settings.name.clone())
            .providers(selected)
            .breakers(Arc::clone(&breakers))
            .sink(sink)
            .build();

        Self::new(
            settings.name.clone(),
            settings.capabilities.iter().cloned(),
            Arc::new(chain),
            &breakers,
        )
    }

    /// Set generation options
    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    /// Set how many facts are read into the prompt
    pub fn with_fact_limit(mut self, limit: usize) -> Self {
        self.fact_limit = limit;
        self
    }

    /// The agent's fallback chain
    pub fn chain(&self) -> &Arc<FallbackChain> {
        &self.chain
    }

    /// The agent's own breaker
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn read_facts(&self, context: &AgentContext) -> Vec<MemoryItem> {
        if self.fact_limit == 0 {
            return Vec::new();
        }

        let query = context.memory.query(
            MemoryFilter::default()
                .of_type(MemoryItemType::Fact)
                .ordered_by(QueryOrder::Relevance),
        );
        let outcome = tokio::select! {
            _ = context.cancel.cancelled() => return Vec::new(),
            outcome = query.top(self.fact_limit) => outcome,
        };

        match outcome {
            Ok(ReadOutcome::Available(items)) => items,
            Ok(ReadOutcome::Unavailable) => {
                debug!(agent = %self.name, "Shared memory unavailable, continuing without facts");
                Vec::new()
            }
            Err(err) => {
                warn!(agent = %self.name, error = %err, "Failed to read facts");
                Vec::new()
            }
        }
    }

    async fn generate(&self, prompt: &str, context: &AgentContext) -> Result<Generation, CallError<ChainFailure>> {
        self.breaker
            .execute(|| async {
                match self.chain.generate(prompt, &self.options, &context.cancel).await {
                    GenerationResult::Success(generation) => Ok(generation),
                    GenerationResult::Unavailable { .. } => Err(ChainFailure::Exhausted),
                    GenerationResult::Cancelled { .. } => Err(ChainFailure::Cancelled),
                }
            })
            .await
    }
}

fn build_prompt(input: &AgentInput, facts: &[MemoryItem]) -> String {
    let mut prompt = format!(
        "Task: {}\nSubtask: {} ({})\nInput: {}\n",
        input.task_description, input.name, input.capability, input.payload
    );
    if !input.task_context.is_null() {
        prompt.push_str(&format!("Context: {}\n", input.task_context));
    }
    for (name, result) in &input.dependency_results {
        prompt.push_str(&format!("Result of {}: {}\n", name, result));
    }
    for fact in facts {
        prompt.push_str(&format!("Fact {}: {}\n", fact.key.name, fact.value));
    }
    prompt
}

fn summarize(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default().trim();
    if line.chars().count() > SUMMARY_CHARS {
        let cut: String = line.chars().take(SUMMARY_CHARS).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}

#[async_trait]
impl Agent for ModelAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> BTreeSet<String> {
        self.capabilities.clone()
    }

    async fn process_task(
        &self,
        input: AgentInput,
        context: AgentContext,
    ) -> Result<AgentOutput, AgentFailure> {
        let facts = self.read_facts(&context).await;
        if context.is_cancelled() {
            return Err(AgentFailure::retryable("cancelled"));
        }

        let prompt = build_prompt(&input, &facts);
        let generation = match self.generate(&prompt, &context).await {
            Ok(generation) => generation,
            Err(CallError::Rejected { state, .. }) => {
                return Err(AgentFailure::retryable(format!(
                    "agent {} circuit is {}",
                    self.name, state
                )));
            }
            Err(CallError::Failed(err)) => return Err(AgentFailure::retryable(err.to_string())),
        };

        let decision = json!({
            "subtask": input.name,
            "text": generation.text,
            "provider": generation.provider_id,
        });
        match context
            .memory
            .put(format!("decision/{}", input.subtask_id), decision, MemoryItemType::Decision, None)
            .await
        {
            Ok(outcome) if !outcome.is_stored() => {
                debug!(agent = %self.name, subtask = %input.name, "Decision not recorded")
            }
            Ok(_) => {}
            Err(err) => warn!(agent = %self.name, error = %err, "Failed to record decision"),
        }

        Ok(AgentOutput {
            result: json!({
                "text": generation.text,
                "provider": generation.provider_id,
                "provider_index": generation.provider_index,
                "facts_used": facts.len(),
            }),
            summary: Some(summarize(&generation.text)),
        })
    }

    fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }
}
