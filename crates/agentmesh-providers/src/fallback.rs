//! Ordered failover across interchangeable model providers
//!
//! Each provider sits behind its own circuit breaker, keyed by the provider
//! and the chain's consumer. A call walks the providers in rank order and
//! returns the first success; an open breaker means the provider is skipped
//! without any request being made.

use std::sync::Arc;
use std::time::Instant;

use agentmesh_common::{
    noop_sink, CallError, CircuitBreaker, CircuitBreakerRegistry, EventRecord, FailureKind,
    SharedSink,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::ProviderError,
    models::{Attempt, AttemptOutcome, GenerateOptions, Generation, GenerationResult, ProviderUsage},
    provider::{ModelProvider, RankingPolicy, StaticPriority},
};

/// Event emitted once per chain call
pub const GENERATE_EVENT: &str = "fallback_chain.generate";

/// Breaker dependency name for a provider
pub fn provider_dependency(provider_id: &str) -> String {
    format!("model:{}", provider_id)
}

struct ChainEntry {
    provider: Arc<dyn ModelProvider>,
    breaker: Arc<CircuitBreaker>,
}

/// Builder for [`FallbackChain`]
pub struct FallbackChainBuilder {
    consumer: String,
    providers: Vec<Arc<dyn ModelProvider>>,
    ranking: Box<dyn RankingPolicy>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    sink: SharedSink,
}

impl FallbackChainBuilder {
    /// Append a provider
    pub fn provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Append several providers
    pub fn providers(mut self, providers: impl IntoIterator<Item = Arc<dyn ModelProvider>>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Replace the ranking policy (default: [`StaticPriority`])
    pub fn ranking(mut self, ranking: impl RankingPolicy + 'static) -> Self {
        self.ranking = Box::new(ranking);
        self
    }

    /// Take breakers from a shared registry
    pub fn breakers(mut self, registry: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(registry);
        self
    }

    /// Publish events to `sink`
    pub fn sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Build the chain
    pub fn build(self) -> FallbackChain {
        let registry = self
            .breakers
            .unwrap_or_else(|| Arc::new(CircuitBreakerRegistry::new()));

        let entries: Vec<ChainEntry> = self
            .ranking
            .rank(self.providers)
            .into_iter()
            .map(|provider| {
                let breaker =
                    registry.get_or_create(&provider_dependency(provider.id()), &self.consumer);
                ChainEntry { provider, breaker }
            })
            .collect();

        if entries.is_empty() {
            warn!(consumer = %self.consumer, "Fallback chain built with no providers");
        }

        let usage = entries
            .iter()
            .map(|entry| ProviderUsage {
                provider_id: entry.provider.id().to_string(),
                ..Default::default()
            })
            .collect();

        FallbackChain {
            consumer: self.consumer,
            entries,
            usage: Mutex::new(usage),
            sink: self.sink,
        }
    }
}

/// Ordered list of providers, each guarded by its own breaker
pub struct FallbackChain {
    consumer: String,
    entries: Vec<ChainEntry>,
    usage: Mutex<Vec<ProviderUsage>>,
    sink: SharedSink,
}

impl FallbackChain {
    /// Start building a chain for `consumer` (usually the agent name)
    pub fn builder(consumer: impl Into<String>) -> FallbackChainBuilder {
        FallbackChainBuilder {
            consumer: consumer.into(),
            providers: Vec::new(),
            ranking: Box::new(StaticPriority),
            breakers: None,
            sink: noop_sink(),
        }
    }

    /// Consumer name used for breaker keys
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Provider ids in the order they are tried
    pub fn provider_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.provider.id().to_string())
            .collect()
    }

    /// Number of providers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the chain has no providers
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Breaker guarding the provider at `index`
    pub fn breaker(&self, index: usize) -> Option<Arc<CircuitBreaker>> {
        self.entries.get(index).map(|entry| Arc::clone(&entry.breaker))
    }

    /// Whether at least one provider would currently be attempted
    pub fn has_available_provider(&self) -> bool {
        self.entries.iter().any(|entry| entry.breaker.is_call_permitted())
    }

    /// Usage counters per provider, in chain order
    pub fn usage(&self) -> Vec<ProviderUsage> {
        self.usage.lock().clone()
    }

    /// Generate with failover.
    ///
    /// Never returns an error: exhaustion yields
    /// [`GenerationResult::Unavailable`] and cancellation
    /// [`GenerationResult::Cancelled`].
    pub async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> GenerationResult {
        let started = Instant::now();
        let mut attempts = Vec::with_capacity(self.entries.len());

        for (index, entry) in self.entries.iter().enumerate() {
            if cancel.is_cancelled() {
                return self.finish_cancelled(attempts, started);
            }

            let provider_id = entry.provider.id().to_string();
            let call_started = Instant::now();
            let call = entry
                .breaker
                .execute(|| Self::call_provider(entry.provider.as_ref(), prompt, options));

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    return self.finish_cancelled(attempts, started);
                }
                result = call => result,
            };

            match result {
                Ok(text) => {
                    let latency = call_started.elapsed();
                    let cost = entry.provider.descriptor().cost_per_call;
                    self.record(index, |usage| {
                        usage.calls += 1;
                        usage.successes += 1;
                        usage.total_cost += cost;
                        usage.total_latency += latency;
                    });
                    attempts.push(Attempt {
                        provider_id: provider_id.clone(),
                        provider_index: index,
                        outcome: AttemptOutcome::Succeeded,
                    });

                    if index > 0 {
                        info!(
                            consumer = %self.consumer,
                            provider = %provider_id,
                            index,
                            "Served by fallback provider"
                        );
                    }
                    self.emit("success", Some(&provider_id), Some(index), latency.as_secs_f64() * 1000.0);

                    return GenerationResult::Success(Generation {
                        provider_id,
                        provider_index: index,
                        text,
                        latency,
                        cost,
                        attempts,
                    });
                }
                Err(CallError::Rejected { state, .. }) => {
                    debug!(
                        consumer = %self.consumer,
                        provider = %provider_id,
                        state = %state,
                        "Provider skipped, circuit not closed"
                    );
                    self.record(index, |usage| usage.skipped += 1);
                    attempts.push(Attempt {
                        provider_id,
                        provider_index: index,
                        outcome: AttemptOutcome::Skipped { state },
                    });
                }
                Err(CallError::Failed(err)) => {
                    warn!(
                        consumer = %self.consumer,
                        provider = %provider_id,
                        error = %err,
                        "Provider failed, falling back"
                    );
                    self.record(index, |usage| {
                        usage.calls += 1;
                        usage.failures += 1;
                    });
                    attempts.push(Attempt {
                        provider_id,
                        provider_index: index,
                        outcome: AttemptOutcome::Failed {
                            kind: err.failure_kind().to_string(),
                            message: err.to_string(),
                        },
                    });
                }
            }
        }

        warn!(
            consumer = %self.consumer,
            providers = self.entries.len(),
            "All providers exhausted"
        );
        self.emit("unavailable", None, None, started.elapsed().as_secs_f64() * 1000.0);
        GenerationResult::Unavailable { attempts }
    }

    async fn call_provider(
        provider: &dyn ModelProvider,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, provider.generate(prompt, options))
                .await
                .map_err(|_| ProviderError::Timeout(limit.as_millis() as u64))?,
            None => provider.generate(prompt, options).await,
        }
    }

    fn finish_cancelled(&self, attempts: Vec<Attempt>, started: Instant) -> GenerationResult {
        debug!(consumer = %self.consumer, "Generation cancelled");
        self.emit("cancelled", None, None, started.elapsed().as_secs_f64() * 1000.0);
        GenerationResult::Cancelled { attempts }
    }

    fn record(&self, index: usize, update: impl FnOnce(&mut ProviderUsage)) {
        if let Some(usage) = self.usage.lock().get_mut(index) {
            update(usage);
        }
    }

    fn emit(&self, outcome: &str, provider: Option<&str>, index: Option<usize>, value: f64) {
        let mut record = EventRecord::new(GENERATE_EVENT, value)
            .with_label("consumer", &self.consumer)
            .with_label("outcome", outcome);
        if let Some(provider) = provider {
            record = record.with_label("provider", provider);
        }
        if let Some(index) = index {
            record = record.with_label("provider_index", index);
        }
        self.sink.emit(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderDescriptor;
    use agentmesh_common::{CircuitBreakerConfig, CircuitState, RecordingSink};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedProvider {
        descriptor: ProviderDescriptor,
        fail: bool,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(id: &str, priority: u32, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                descriptor: ProviderDescriptor::new(id, format!("mock://{}", id), priority)
                    .with_cost(0.25),
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.descriptor
        }

        async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ProviderError::NetworkError("connection refused".to_string()))
            } else {
                Ok(format!("{}: {}", self.descriptor.id, prompt))
            }
        }
    }

    #[tokio::test]
    async fn test_first_healthy_provider_serves() {
        let chain = FallbackChain::builder("agent")
            .provider(ScriptedProvider::new("a", 0, false))
            .provider(ScriptedProvider::new("b", 1, false))
            .build();

        let result = chain
            .generate("hi", &GenerateOptions::default(), &CancellationToken::new())
            .await;
        let generation = result.into_generation().unwrap();
        assert_eq!(generation.provider_id, "a");
        assert_eq!(generation.provider_index, 0);
        assert_eq!(generation.text, "a: hi");
        assert_eq!(generation.cost, 0.25);
    }

    #[tokio::test]
    async fn test_ranking_by_priority() {
        let chain = FallbackChain::builder("agent")
            .provider(ScriptedProvider::new("slow", 5, false))
            .provider(ScriptedProvider::new("fast", 1, false))
            .provider(ScriptedProvider::new("also-fast", 1, false))
            .build();

        assert_eq!(chain.provider_ids(), vec!["fast", "also-fast", "slow"]);
    }

    #[tokio::test]
    async fn test_failure_falls_through_and_is_accounted() {
        let failing = ScriptedProvider::new("a", 0, true);
        let healthy = ScriptedProvider::new("b", 1, false);
        let chain = FallbackChain::builder("agent")
            .provider(failing.clone())
            .provider(healthy.clone())
            .build();

        let result = chain
            .generate("q", &GenerateOptions::default(), &CancellationToken::new())
            .await;

        let generation = result.into_generation().unwrap();
        assert_eq!(generation.provider_id, "b");
        assert_eq!(generation.provider_index, 1);
        assert!(matches!(
            generation.attempts[0].outcome,
            AttemptOutcome::Failed { ref kind, .. } if kind == "network"
        ));

        let usage = chain.usage();
        assert_eq!(usage[0].failures, 1);
        assert_eq!(usage[1].successes, 1);
        assert_eq!(usage[1].total_cost, 0.25);
        assert_eq!(chain.breaker(0).unwrap().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_all_failing_returns_unavailable() {
        let sink = Arc::new(RecordingSink::new());
        let chain = FallbackChain::builder("agent")
            .provider(ScriptedProvider::new("a", 0, true))
            .provider(ScriptedProvider::new("b", 1, true))
            .sink(sink.clone())
            .build();

        let result = chain
            .generate("q", &GenerateOptions::default(), &CancellationToken::new())
            .await;
        assert!(matches!(result, GenerationResult::Unavailable { ref attempts } if attempts.len() == 2));

        let events = sink.named(GENERATE_EVENT);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].label("outcome"), Some("unavailable"));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        struct Hanging(ProviderDescriptor);

        #[async_trait]
        impl ModelProvider for Hanging {
            fn descriptor(&self) -> &ProviderDescriptor {
                &self.0
            }

            async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String, ProviderError> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok("late".to_string())
            }
        }

        let registry = Arc::new(CircuitBreakerRegistry::with_config(
            CircuitBreakerConfig::default().with_failure_threshold(1),
            noop_sink(),
        ));
        let chain = FallbackChain::builder("agent")
            .provider(Arc::new(Hanging(ProviderDescriptor::new("slow", "mock://slow", 0))))
            .breakers(registry.clone())
            .build();

        let options = GenerateOptions::default().with_timeout(Duration::from_millis(20));
        let result = chain.generate("q", &options, &CancellationToken::new()).await;

        assert!(matches!(
            result.attempts()[0].outcome,
            AttemptOutcome::Failed { ref kind, .. } if kind == "timeout"
        ));
        assert_eq!(
            registry.get("model:slow", "agent").unwrap().state(),
            CircuitState::Open
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let provider = ScriptedProvider::new("a", 0, false);
        let chain = FallbackChain::builder("agent").provider(provider.clone()).build();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = chain.generate("q", &GenerateOptions::default(), &cancel).await;
        assert!(matches!(result, GenerationResult::Cancelled { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_chain_is_unavailable() {
        let chain = FallbackChain::builder("agent").build();
        assert!(chain.is_empty());
        assert!(!chain.has_available_provider());
        let result = chain
            .generate("q", &GenerateOptions::default(), &CancellationToken::new())
            .await;
        assert!(matches!(result, GenerationResult::Unavailable { ref attempts } if attempts.is_empty()));
    }
}
