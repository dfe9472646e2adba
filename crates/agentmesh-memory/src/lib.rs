//! Shared memory store for agents and the coordinator
//!
//! Items are namespaced by scope, TTL-bound, optionally compressed, and
//! exchanged with a pluggable [`MemoryBackend`] through a circuit breaker.
//! Expiry is enforced at read time; the [`sweeper`] reclaims space.

#![warn(missing_docs)]

pub mod backend;
pub mod codec;
pub mod error;
pub mod models;
pub mod query;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod query_properties;

pub use backend::{InMemoryBackend, MemoryBackend, ScanRequest};
pub use error::{BackendError, MemoryError, Result};
pub use models::{
    MemoryFilter, MemoryItem, MemoryItemType, MemoryKey, MemoryWrite, Payload, QueryOrder,
    ScanCursor, ScanPosition, StoredItem,
};
pub use query::MemoryQuery;
pub use store::{
    DropReason, MemoryConfig, ReadOutcome, ScopedMemory, SharedMemoryStore, WriteOutcome,
    STORE_DEPENDENCY,
};
pub use sweeper::spawn_sweeper;
