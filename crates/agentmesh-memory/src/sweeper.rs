//! Background purge of expired items
//!
//! Reads already hide expired items; the sweeper only reclaims space.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::store::SharedMemoryStore;

/// Spawn a task that purges expired items every `interval` until `cancel`
/// fires
pub fn spawn_sweeper(
    store: SharedMemoryStore,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Memory sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match store.purge_expired().await {
                        Ok(0) => {}
                        Ok(purged) => debug!(purged, "Purged expired memory items"),
                        Err(err) => debug!(error = %err, "Memory sweep skipped"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, MemoryBackend};
    use crate::models::{MemoryItemType, MemoryKey};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sweeper_purges_and_stops() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = SharedMemoryStore::with_defaults(backend.clone());
        store
            .put(
                MemoryKey::new("net", "short"),
                serde_json::json!(1),
                MemoryItemType::Fact,
                Some(Duration::from_millis(5)),
            )
            .await
            .unwrap();
        store
            .put(MemoryKey::new("net", "long"), serde_json::json!(2), MemoryItemType::Fact, None)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(store, Duration::from_millis(10), cancel.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(backend.len().await.unwrap(), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
