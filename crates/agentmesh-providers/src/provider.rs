//! Provider trait and ranking

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::ProviderError,
    models::{GenerateOptions, ProviderDescriptor},
};

/// Core trait that all backend model providers implement
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Static description: endpoint, rank, cost, latency
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Get the provider's unique identifier
    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// Generate text for a prompt
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, ProviderError>;
}

/// Orders providers once, when a chain is built
pub trait RankingPolicy: Send + Sync {
    /// Return the providers in the order they should be tried
    fn rank(&self, providers: Vec<Arc<dyn ModelProvider>>) -> Vec<Arc<dyn ModelProvider>>;
}

/// Sort by declared priority rank, keeping declaration order among equals
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticPriority;

impl RankingPolicy for StaticPriority {
    fn rank(&self, mut providers: Vec<Arc<dyn ModelProvider>>) -> Vec<Arc<dyn ModelProvider>> {
        providers.sort_by_key(|p| p.descriptor().priority);
        providers
    }
}

/// Keep the order providers were added in
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarationOrder;

impl RankingPolicy for DeclarationOrder {
    fn rank(&self, providers: Vec<Arc<dyn ModelProvider>>) -> Vec<Arc<dyn ModelProvider>> {
        providers
    }
}
