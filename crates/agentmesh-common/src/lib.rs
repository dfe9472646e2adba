//! Shared building blocks for the agent mesh
//!
//! - **CircuitBreaker**: per (dependency, consumer) failure isolation with a
//!   single-trial half-open state
//! - **EventSink**: structured observability events
//! - **logging**: tracing subscriber setup

#![warn(missing_docs)]

pub mod circuit_breaker;
pub mod events;
pub mod logging;

#[cfg(test)]
mod circuit_breaker_properties;

pub use circuit_breaker::{
    BreakerKey, BreakerSnapshot, CallError, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerRegistry, CircuitState, FailureKind, RATE_LIMITED_KIND, STATE_CHANGE_EVENT,
};
pub use events::{
    noop_sink, EventRecord, EventSink, NoopSink, RecordingSink, SharedSink, TracingSink,
};
pub use logging::{init_tracing, LogSettings, LoggingError};
