//! Backing store contract and the in-process implementation

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    error::BackendError,
    models::{MemoryFilter, MemoryKey, ScanCursor, StoredItem},
};

/// A page request against the backing store
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    /// Filter and order
    pub filter: MemoryFilter,
    /// Items expiring at or before this instant are excluded
    pub now: DateTime<Utc>,
    /// Resume strictly after this position in filter order
    pub after: Option<ScanCursor>,
    /// Maximum items to return
    pub limit: usize,
}

/// Key-value store with TTL support and basic filtering
///
/// Implementations may be remote; every call is made through the memory
/// store's circuit breaker.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Insert or replace an item (last write wins)
    async fn put(&self, item: StoredItem) -> Result<(), BackendError>;

    /// Fetch an item by key, expired or not
    async fn get(&self, key: &MemoryKey) -> Result<Option<StoredItem>, BackendError>;

    /// Remove an item, returning whether it existed
    async fn delete(&self, key: &MemoryKey) -> Result<bool, BackendError>;

    /// Return one page of matching, unexpired items in filter order
    async fn scan(&self, request: &ScanRequest) -> Result<Vec<StoredItem>, BackendError>;

    /// Physically remove items expired at `now`
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, BackendError>;

    /// Number of items held, expired ones included
    async fn len(&self) -> Result<usize, BackendError>;
}

/// In-process backing store
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    items: Arc<RwLock<HashMap<MemoryKey, StoredItem>>>,
}

impl InMemoryBackend {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn put(&self, item: StoredItem) -> Result<(), BackendError> {
        let mut items = self.items.write().await;
        items.insert(item.key.clone(), item);
        Ok(())
    }

    async fn get(&self, key: &MemoryKey) -> Result<Option<StoredItem>, BackendError> {
        let items = self.items.read().await;
        Ok(items.get(key).cloned())
    }

    async fn delete(&self, key: &MemoryKey) -> Result<bool, BackendError> {
        let mut items = self.items.write().await;
        Ok(items.remove(key).is_some())
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Vec<StoredItem>, BackendError> {
        let mut matching: Vec<StoredItem> = {
            let items = self.items.read().await;
            items
                .values()
                .filter(|item| !item.is_expired_at(request.now) && request.filter.matches(item))
                .filter(|item| {
                    request
                        .after
                        .as_ref()
                        .map_or(true, |cursor| request.filter.is_after(item, cursor))
                })
                .cloned()
                .collect()
        };
        request.filter.sort(&mut matching);
        matching.truncate(request.limit);
        Ok(matching)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, BackendError> {
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|_, item| !item.is_expired_at(now));
        Ok(before - items.len())
    }

    async fn len(&self) -> Result<usize, BackendError> {
        Ok(self.items.read().await.len())
    }
}
