//! Property-based tests for paged queries and lazy expiry

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::StreamExt;
    use proptest::prelude::*;
    use serde_json::json;

    use crate::backend::InMemoryBackend;
    use crate::models::{MemoryFilter, MemoryItemType, MemoryKey, QueryOrder};
    use crate::store::SharedMemoryStore;

    fn item_type(index: u8) -> MemoryItemType {
        match index % 4 {
            0 => MemoryItemType::Fact,
            1 => MemoryItemType::Context,
            2 => MemoryItemType::Decision,
            _ => MemoryItemType::Feedback,
        }
    }

    proptest! {
        /// Page size never changes what a query returns or its order
        #[test]
        fn prop_paging_is_transparent(
            confidences in prop::collection::vec(0u8..=10, 0..30),
            page_size in 1usize..8,
            relevance in any::<bool>(),
        ) {
            tokio_test::block_on(async {
                let store = SharedMemoryStore::with_defaults(Arc::new(InMemoryBackend::new()));
                let scoped = store.scoped("net");
                for (i, c) in confidences.iter().enumerate() {
                    scoped
                        .put_with_confidence(format!("k{}", i), json!(i), item_type(*c), f64::from(*c) / 10.0)
                        .await
                        .unwrap();
                }

                let order = if relevance { QueryOrder::Relevance } else { QueryOrder::Recency };
                let filter = MemoryFilter::default().ordered_by(order);
                let query = scoped.query(filter);

                let whole: Vec<MemoryKey> = query
                    .clone()
                    .with_page_size(1000)
                    .stream()
                    .map(|r| r.unwrap().key)
                    .collect()
                    .await;
                let paged: Vec<MemoryKey> = query
                    .with_page_size(page_size)
                    .stream()
                    .map(|r| r.unwrap().key)
                    .collect()
                    .await;

                assert_eq!(whole.len(), confidences.len());
                assert_eq!(whole, paged);
            });
        }

        /// Expired items never surface, live ones always do
        #[test]
        fn prop_expired_items_invisible(expired in prop::collection::vec(any::<bool>(), 1..20)) {
            tokio_test::block_on(async {
                let store = SharedMemoryStore::with_defaults(Arc::new(InMemoryBackend::new()));
                let scoped = store.scoped("net");
                for (i, gone) in expired.iter().enumerate() {
                    let ttl = if *gone { Duration::ZERO } else { Duration::from_secs(600) };
                    scoped
                        .put(format!("k{}", i), json!(i), MemoryItemType::Fact, Some(ttl))
                        .await
                        .unwrap();
                }

                let visible = scoped
                    .query(MemoryFilter::default())
                    .top(expired.len())
                    .await
                    .unwrap()
                    .available()
                    .unwrap();
                let live = expired.iter().filter(|gone| !**gone).count();
                assert_eq!(visible.len(), live);

                for (i, gone) in expired.iter().enumerate() {
                    let read = scoped.get(format!("k{}", i)).await.unwrap().available().unwrap();
                    assert_eq!(read.is_none(), *gone);
                }
            });
        }
    }
}
