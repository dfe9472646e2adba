//! Shared memory store client
//!
//! Every backend call goes through one circuit breaker guarding the store
//! connection. When the store is unreachable, reads say so explicitly with
//! [`ReadOutcome::Unavailable`] and writes are dropped with a warning.

use std::sync::Arc;
use std::time::Duration;

use agentmesh_common::{CallError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use agentmesh_config::{MemorySettings, NetworkSettings};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    backend::{MemoryBackend, ScanRequest},
    codec,
    error::{MemoryError, Result},
    models::{MemoryFilter, MemoryItem, MemoryItemType, MemoryKey, MemoryWrite, StoredItem},
    query::MemoryQuery,
};

/// Breaker dependency name for the backing store
pub const STORE_DEPENDENCY: &str = "store:memory";

/// Store tuning
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    /// JSON values longer than this are compressed
    pub compression_threshold_bytes: usize,
    /// Items per backend page when streaming a query
    pub query_page_size: usize,
    /// TTL applied to writes that do not set one
    pub default_ttl: Option<Duration>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            compression_threshold_bytes: 4096,
            query_page_size: 32,
            default_ttl: None,
        }
    }
}

impl MemoryConfig {
    /// Set the default TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Build from the memory and network config sections
    pub fn from_settings(memory: &MemorySettings, network: &NetworkSettings) -> Self {
        Self::from(memory).with_default_ttl(network.memory_ttl())
    }
}

impl From<&MemorySettings> for MemoryConfig {
    fn from(settings: &MemorySettings) -> Self {
        Self {
            compression_threshold_bytes: settings.compression_threshold_bytes,
            query_page_size: settings.query_page_size.max(1),
            default_ttl: None,
        }
    }
}

/// Result of a read that may not reach the store
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome<T> {
    /// The store answered
    Available(T),
    /// The store could not be consulted; absence is unknown
    Unavailable,
}

impl<T> ReadOutcome<T> {
    /// Whether the store answered
    pub fn is_available(&self) -> bool {
        matches!(self, ReadOutcome::Available(_))
    }

    /// The answer, if any
    pub fn available(self) -> Option<T> {
        match self {
            ReadOutcome::Available(value) => Some(value),
            ReadOutcome::Unavailable => None,
        }
    }

    /// Transform the answer
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ReadOutcome<U> {
        match self {
            ReadOutcome::Available(value) => ReadOutcome::Available(f(value)),
            ReadOutcome::Unavailable => ReadOutcome::Unavailable,
        }
    }
}

/// Why a write did not reach the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The store circuit is open
    CircuitOpen,
    /// The store failed the write
    BackendFailed(String),
}

/// Result of a best-effort write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The store applied the write
    Stored,
    /// The write was dropped
    Dropped(DropReason),
}

impl WriteOutcome {
    /// Whether the store applied the write
    pub fn is_stored(&self) -> bool {
        matches!(self, WriteOutcome::Stored)
    }
}

struct StoreInner {
    backend: Arc<dyn MemoryBackend>,
    breaker: Arc<CircuitBreaker>,
    config: MemoryConfig,
}

/// Client for the shared memory store. Cheap to clone.
#[derive(Clone)]
pub struct SharedMemoryStore {
    inner: Arc<StoreInner>,
}

impl SharedMemoryStore {
    /// Create a store client guarded by `breaker`
    pub fn new(backend: Arc<dyn MemoryBackend>, breaker: Arc<CircuitBreaker>, config: MemoryConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                breaker,
                config,
            }),
        }
    }

    /// Create a store client with its own default breaker
    pub fn with_defaults(backend: Arc<dyn MemoryBackend>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            STORE_DEPENDENCY,
            CircuitBreakerConfig::default(),
        ));
        Self::new(backend, breaker, MemoryConfig::default())
    }

    /// Store configuration
    pub fn config(&self) -> &MemoryConfig {
        &self.inner.config
    }

    /// Breaker guarding the store
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.breaker
    }

    /// Effective state of the store breaker
    pub fn circuit_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    /// View of the store fixed to one scope
    pub fn scoped(&self, scope: impl Into<String>) -> ScopedMemory {
        ScopedMemory {
            store: self.clone(),
            scope: scope.into(),
        }
    }

    /// Write `value` under `key`. `ttl` falls back to the configured default.
    pub async fn put(
        &self,
        key: MemoryKey,
        value: serde_json::Value,
        item_type: MemoryItemType,
        ttl: Option<Duration>,
    ) -> Result<WriteOutcome> {
        let mut request = MemoryWrite::new(key, value, item_type);
        request.ttl = ttl;
        self.write(request).await
    }

    /// Write a fully specified item.
    ///
    /// Malformed requests are errors. Store trouble is not: the write is
    /// dropped and reported as [`WriteOutcome::Dropped`].
    pub async fn write(&self, request: MemoryWrite) -> Result<WriteOutcome> {
        validate(&request)?;

        let payload = codec::encode(&request.value, self.inner.config.compression_threshold_bytes)?;
        let created_at = Utc::now();
        let expires_at = match request.ttl.or(self.inner.config.default_ttl) {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|_| MemoryError::InvalidItem(format!("ttl {:?} out of range", ttl)))?;
                Some(created_at + ttl)
            }
            None => None,
        };

        let key = request.key;
        let compressed = payload.is_compressed();
        let item = StoredItem {
            key: key.clone(),
            payload,
            item_type: request.item_type,
            confidence: request.confidence,
            created_at,
            expires_at,
        };

        let backend = &self.inner.backend;
        match self.inner.breaker.execute(move || backend.put(item)).await {
            Ok(()) => {
                debug!(key = %key, compressed, "Memory item stored");
                Ok(WriteOutcome::Stored)
            }
            Err(CallError::Rejected { .. }) => {
                warn!(key = %key, "Shared memory circuit open, write dropped");
                Ok(WriteOutcome::Dropped(DropReason::CircuitOpen))
            }
            Err(CallError::Failed(err)) => {
                warn!(key = %key, error = %err, "Shared memory write failed, dropped");
                Ok(WriteOutcome::Dropped(DropReason::BackendFailed(err.to_string())))
            }
        }
    }

    /// Read one item. Expired items read as absent.
    pub async fn get(&self, key: &MemoryKey) -> Result<ReadOutcome<Option<MemoryItem>>> {
        let backend = &self.inner.backend;
        match self.inner.breaker.execute(|| backend.get(key)).await {
            Ok(Some(stored)) if stored.is_expired_at(Utc::now()) => Ok(ReadOutcome::Available(None)),
            Ok(Some(stored)) => Ok(ReadOutcome::Available(Some(decode_item(stored)?))),
            Ok(None) => Ok(ReadOutcome::Available(None)),
            Err(CallError::Rejected { .. }) => {
                debug!(key = %key, "Shared memory circuit open, read unavailable");
                Ok(ReadOutcome::Unavailable)
            }
            Err(CallError::Failed(err)) => {
                warn!(key = %key, error = %err, "Shared memory read failed");
                Ok(ReadOutcome::Unavailable)
            }
        }
    }

    /// Remove an item
    pub async fn invalidate(&self, key: &MemoryKey) -> Result<WriteOutcome> {
        let backend = &self.inner.backend;
        match self.inner.breaker.execute(|| backend.delete(key)).await {
            Ok(existed) => {
                debug!(key = %key, existed, "Memory item invalidated");
                Ok(WriteOutcome::Stored)
            }
            Err(CallError::Rejected { .. }) => {
                warn!(key = %key, "Shared memory circuit open, invalidation dropped");
                Ok(WriteOutcome::Dropped(DropReason::CircuitOpen))
            }
            Err(CallError::Failed(err)) => {
                warn!(key = %key, error = %err, "Shared memory invalidation failed");
                Ok(WriteOutcome::Dropped(DropReason::BackendFailed(err.to_string())))
            }
        }
    }

    /// Lazy, restartable query. Nothing is fetched until the result is
    /// streamed.
    pub fn query(&self, filter: MemoryFilter) -> MemoryQuery {
        MemoryQuery::new(self.clone(), filter, self.inner.config.query_page_size)
    }

    /// Physically remove expired items
    pub async fn purge_expired(&self) -> Result<usize> {
        let backend = &self.inner.backend;
        match self
            .inner
            .breaker
            .execute(|| backend.purge_expired(Utc::now()))
            .await
        {
            Ok(purged) => Ok(purged),
            Err(CallError::Rejected { .. }) => Err(MemoryError::Unavailable),
            Err(CallError::Failed(err)) => Err(MemoryError::Backend(err)),
        }
    }

    pub(crate) async fn scan_page(&self, request: &ScanRequest) -> Result<Vec<StoredItem>> {
        let backend = &self.inner.backend;
        match self.inner.breaker.execute(|| backend.scan(request)).await {
            Ok(page) => Ok(page),
            Err(CallError::Rejected { .. }) => {
                debug!("Shared memory circuit open, query unavailable");
                Err(MemoryError::Unavailable)
            }
            Err(CallError::Failed(err)) => {
                warn!(error = %err, "Shared memory scan failed");
                Err(MemoryError::Unavailable)
            }
        }
    }
}

fn validate(request: &MemoryWrite) -> Result<()> {
    if request.key.scope.is_empty() || request.key.name.is_empty() {
        return Err(MemoryError::InvalidItem(
            "key scope and name must not be empty".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&request.confidence) {
        return Err(MemoryError::InvalidItem(format!(
            "confidence {} outside 0.0..=1.0",
            request.confidence
        )));
    }
    Ok(())
}

pub(crate) fn decode_item(stored: StoredItem) -> Result<MemoryItem> {
    let value = codec::decode(&stored.payload)?;
    Ok(MemoryItem {
        key: stored.key,
        value,
        item_type: stored.item_type,
        confidence: stored.confidence,
        created_at: stored.created_at,
        expires_at: stored.expires_at,
    })
}

/// Store view bound to one network or session scope
#[derive(Clone)]
pub struct ScopedMemory {
    store: SharedMemoryStore,
    scope: String,
}

impl ScopedMemory {
    /// Scope name
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Underlying store
    pub fn store(&self) -> &SharedMemoryStore {
        &self.store
    }

    /// Key for `name` in this scope
    pub fn key(&self, name: impl Into<String>) -> MemoryKey {
        MemoryKey::new(self.scope.clone(), name)
    }

    /// Write a value
    pub async fn put(
        &self,
        name: impl Into<String>,
        value: serde_json::Value,
        item_type: MemoryItemType,
        ttl: Option<Duration>,
    ) -> Result<WriteOutcome> {
        self.store.put(self.key(name), value, item_type, ttl).await
    }

    /// Write a value with explicit confidence
    pub async fn put_with_confidence(
        &self,
        name: impl Into<String>,
        value: serde_json::Value,
        item_type: MemoryItemType,
        confidence: f64,
    ) -> Result<WriteOutcome> {
        let request = MemoryWrite::new(self.key(name), value, item_type).with_confidence(confidence);
        self.store.write(request).await
    }

    /// Read a value
    pub async fn get(&self, name: impl Into<String>) -> Result<ReadOutcome<Option<MemoryItem>>> {
        self.store.get(&self.key(name)).await
    }

    /// Remove a value
    pub async fn invalidate(&self, name: impl Into<String>) -> Result<WriteOutcome> {
        self.store.invalidate(&self.key(name)).await
    }

    /// Query within this scope; any scope on `filter` is replaced
    pub fn query(&self, mut filter: MemoryFilter) -> MemoryQuery {
        filter.scope = Some(self.scope.clone());
        self.store.query(filter)
    }
}
