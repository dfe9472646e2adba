//! Shared memory store behavior against healthy and failing backends

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentmesh_common::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use agentmesh_memory::*;
use std::result::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::json;

/// Backend wrapper that can be switched off and counts calls
struct SwitchableBackend {
    inner: InMemoryBackend,
    up: AtomicBool,
    calls: AtomicUsize,
    last_put: parking_lot::Mutex<Option<StoredItem>>,
}

impl SwitchableBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryBackend::new(),
            up: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            last_put: parking_lot::Mutex::new(None),
        })
    }

    fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl MemoryBackend for SwitchableBackend {
    async fn put(&self, item: StoredItem) -> Result<(), BackendError> {
        self.check()?;
        *self.last_put.lock() = Some(item.clone());
        self.inner.put(item).await
    }

    async fn get(&self, key: &MemoryKey) -> Result<Option<StoredItem>, BackendError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &MemoryKey) -> Result<bool, BackendError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Vec<StoredItem>, BackendError> {
        self.check()?;
        self.inner.scan(request).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, BackendError> {
        self.check()?;
        self.inner.purge_expired(now).await
    }

    async fn len(&self) -> Result<usize, BackendError> {
        self.inner.len().await
    }
}

fn store_over(backend: Arc<SwitchableBackend>, threshold: u32, config: MemoryConfig) -> SharedMemoryStore {
    let breaker = Arc::new(CircuitBreaker::new(
        STORE_DEPENDENCY,
        CircuitBreakerConfig::default()
            .with_failure_threshold(threshold)
            .with_recovery_timeout(Duration::from_millis(40)),
    ));
    SharedMemoryStore::new(backend, breaker, config)
}

#[tokio::test]
async fn test_item_visible_before_ttl_and_hidden_after() {
    let backend = SwitchableBackend::new();
    let store = store_over(backend.clone(), 3, MemoryConfig::default());
    let scoped = store.scoped("net-1");

    scoped
        .put("fact", json!("water is wet"), MemoryItemType::Fact, Some(Duration::from_millis(50)))
        .await
        .unwrap();

    assert!(scoped.get("fact").await.unwrap().available().flatten().is_some());
    let listed = scoped.query(MemoryFilter::default()).top(10).await.unwrap();
    assert_eq!(listed.available().map(|v| v.len()), Some(1));

    tokio::time::sleep(Duration::from_millis(80)).await;

    // No purge has run: the item is still physically present.
    assert_eq!(backend.len().await.unwrap(), 1);
    assert_eq!(scoped.get("fact").await.unwrap(), ReadOutcome::Available(None));
    let listed = scoped.query(MemoryFilter::default()).top(10).await.unwrap();
    assert_eq!(listed, ReadOutcome::Available(vec![]));
}

#[tokio::test]
async fn test_large_values_are_stored_compressed() {
    let backend = SwitchableBackend::new();
    let config = MemoryConfig {
        compression_threshold_bytes: 64,
        ..MemoryConfig::default()
    };
    let store = store_over(backend.clone(), 3, config);

    let history: Vec<String> = (0..100).map(|i| format!("message number {}", i)).collect();
    let value = json!({ "history": history });
    store
        .put(MemoryKey::new("net", "history"), value.clone(), MemoryItemType::Context, None)
        .await
        .unwrap();

    let stored = backend.last_put.lock().clone().unwrap();
    assert!(stored.payload.is_compressed());

    let read = store
        .get(&MemoryKey::new("net", "history"))
        .await
        .unwrap()
        .available()
        .flatten()
        .unwrap();
    assert_eq!(read.value, value);
}

#[tokio::test]
async fn test_backend_outage_trips_breaker_and_recovers() {
    let backend = SwitchableBackend::new();
    let store = store_over(backend.clone(), 2, MemoryConfig::default());
    let key = MemoryKey::new("net", "k");
    store.put(key.clone(), json!(1), MemoryItemType::Fact, None).await.unwrap();

    backend.set_up(false);
    assert_eq!(store.get(&key).await.unwrap(), ReadOutcome::Unavailable);
    let dropped = store.put(key.clone(), json!(2), MemoryItemType::Fact, None).await.unwrap();
    assert!(matches!(dropped, WriteOutcome::Dropped(DropReason::BackendFailed(_))));
    assert_eq!(store.circuit_state(), CircuitState::Open);

    // Open circuit: no further calls reach the backend.
    let calls_before = backend.calls.load(Ordering::SeqCst);
    assert_eq!(store.get(&key).await.unwrap(), ReadOutcome::Unavailable);
    assert_eq!(
        store.put(key.clone(), json!(3), MemoryItemType::Fact, None).await.unwrap(),
        WriteOutcome::Dropped(DropReason::CircuitOpen)
    );
    assert_eq!(backend.calls.load(Ordering::SeqCst), calls_before);

    backend.set_up(true);
    tokio::time::sleep(Duration::from_millis(60)).await;

    let item = store.get(&key).await.unwrap().available().flatten().unwrap();
    assert_eq!(item.value, json!(1));
    assert_eq!(store.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_query_stream_reads_only_needed_pages() {
    let backend = SwitchableBackend::new();
    let store = store_over(backend.clone(), 3, MemoryConfig::default());
    let scoped = store.scoped("net");
    for i in 0..20 {
        scoped
            .put(format!("n{:02}", i), json!(i), MemoryItemType::Fact, None)
            .await
            .unwrap();
    }

    let calls_before = backend.calls.load(Ordering::SeqCst);
    let query = scoped.query(MemoryFilter::default()).with_page_size(5);
    let first_three: Vec<MemoryItem> = query
        .stream()
        .take(3)
        .map(|r| r.unwrap())
        .collect()
        .await;

    assert_eq!(first_three.len(), 3);
    assert_eq!(backend.calls.load(Ordering::SeqCst) - calls_before, 1);
}

#[tokio::test]
async fn test_purge_when_store_down() {
    let backend = SwitchableBackend::new();
    let store = store_over(backend.clone(), 1, MemoryConfig::default());
    backend.set_up(false);

    assert!(matches!(store.purge_expired().await, Err(MemoryError::Backend(_))));
    assert!(matches!(store.purge_expired().await, Err(MemoryError::Unavailable)));
}
