//! Lazy, restartable memory queries

use std::collections::VecDeque;

use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};

use crate::{
    backend::ScanRequest,
    error::{MemoryError, Result},
    models::{MemoryFilter, MemoryItem, ScanCursor, StoredItem},
    store::{decode_item, ReadOutcome, SharedMemoryStore},
};

/// A query over the shared store.
///
/// Holding a `MemoryQuery` costs nothing; items are fetched page by page
/// only as the stream returned by [`stream`](Self::stream) is polled. Each
/// call to `stream` starts again from the first item. Pages resume after
/// the sort key of the last item fetched, so items expiring or being
/// written mid-stream never shift what is still to come.
#[derive(Clone)]
pub struct MemoryQuery {
    store: SharedMemoryStore,
    filter: MemoryFilter,
    page_size: usize,
}

struct PageCursor {
    store: SharedMemoryStore,
    filter: MemoryFilter,
    page_size: usize,
    after: Option<ScanCursor>,
    buffer: VecDeque<StoredItem>,
    exhausted: bool,
}

impl MemoryQuery {
    pub(crate) fn new(store: SharedMemoryStore, filter: MemoryFilter, page_size: usize) -> Self {
        Self {
            store,
            filter,
            page_size: page_size.max(1),
        }
    }

    /// Filter in use
    pub fn filter(&self) -> &MemoryFilter {
        &self.filter
    }

    /// Override the backend page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Stream matching items in filter order.
    ///
    /// If the store becomes unreachable the stream yields one
    /// `Err(MemoryError::Unavailable)` and ends.
    pub fn stream(&self) -> BoxStream<'static, Result<MemoryItem>> {
        self.stream_with_page_size(self.page_size)
    }

    fn stream_with_page_size(&self, page_size: usize) -> BoxStream<'static, Result<MemoryItem>> {
        let cursor = PageCursor {
            store: self.store.clone(),
            filter: self.filter.clone(),
            page_size,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        };

        stream::unfold(cursor, |mut cursor| async move {
            loop {
                if let Some(stored) = cursor.buffer.pop_front() {
                    // Items can expire between fetch and yield.
                    if stored.is_expired_at(Utc::now()) {
                        continue;
                    }
                    return Some((decode_item(stored), cursor));
                }
                if cursor.exhausted {
                    return None;
                }

                let request = ScanRequest {
                    filter: cursor.filter.clone(),
                    now: Utc::now(),
                    after: cursor.after.clone(),
                    limit: cursor.page_size,
                };
                match cursor.store.scan_page(&request).await {
                    Ok(page) => {
                        cursor.exhausted = page.len() < cursor.page_size;
                        if let Some(last) = page.last() {
                            cursor.after = Some(ScanCursor::from(last));
                        }
                        cursor.buffer.extend(page);
                    }
                    Err(err) => {
                        cursor.exhausted = true;
                        return Some((Err(err), cursor));
                    }
                }
            }
        })
        .boxed()
    }

    /// First `k` items, fetching no more pages than needed
    pub async fn top(&self, k: usize) -> Result<ReadOutcome<Vec<MemoryItem>>> {
        if k == 0 {
            return Ok(ReadOutcome::Available(Vec::new()));
        }

        let mut items = Vec::with_capacity(k);
        let mut stream = self.stream_with_page_size(self.page_size.min(k));
        while let Some(next) = stream.next().await {
            match next {
                Ok(item) => {
                    items.push(item);
                    if items.len() == k {
                        break;
                    }
                }
                Err(MemoryError::Unavailable) => return Ok(ReadOutcome::Unavailable),
                Err(err) => return Err(err),
            }
        }
        Ok(ReadOutcome::Available(items))
    }
}
