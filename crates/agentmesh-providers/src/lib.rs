//! Backend model providers and the model fallback chain
//!
//! A [`FallbackChain`] holds an ordered list of [`ModelProvider`]s, each
//! guarded by its own circuit breaker, and returns the first success or an
//! explicit unavailability result.

pub mod error;
pub mod fallback;
pub mod http;
pub mod models;
pub mod provider;

pub use error::ProviderError;
pub use fallback::{provider_dependency, FallbackChain, FallbackChainBuilder, GENERATE_EVENT};
pub use http::HttpProvider;
pub use models::{
    Attempt, AttemptOutcome, GenerateOptions, Generation, GenerationResult, ProviderDescriptor,
    ProviderUsage,
};
pub use provider::{DeclarationOrder, ModelProvider, RankingPolicy, StaticPriority};
