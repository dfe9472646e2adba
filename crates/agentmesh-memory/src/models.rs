//! Memory item data model

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of knowledge a memory item carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryItemType {
    /// Established fact, e.g. a subtask result
    Fact,
    /// Working context, e.g. a task snapshot
    Context,
    /// A choice an agent made
    Decision,
    /// Feedback on earlier output
    Feedback,
}

impl fmt::Display for MemoryItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoryItemType::Fact => "fact",
            MemoryItemType::Context => "context",
            MemoryItemType::Decision => "decision",
            MemoryItemType::Feedback => "feedback",
        };
        f.write_str(name)
    }
}

/// Key of a memory item: a network/session scope plus a logical name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryKey {
    /// Network or session scope
    pub scope: String,
    /// Logical name within the scope
    pub name: String,
}

impl MemoryKey {
    /// Create a key
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for MemoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.name)
    }
}

/// A decoded memory item as readers see it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Item key
    pub key: MemoryKey,
    /// Item value
    pub value: serde_json::Value,
    /// Item type
    pub item_type: MemoryItemType,
    /// Writer's confidence, 0.0 to 1.0
    pub confidence: f64,
    /// When the item was written
    pub created_at: DateTime<Utc>,
    /// When the item stops being visible
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryItem {
    /// Whether the item is expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }
}

pub(crate) fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|expires| now >= expires)
}

/// Value as held by the backing store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum Payload {
    /// Serialized JSON bytes
    Plain {
        /// JSON bytes
        data: Vec<u8>,
    },
    /// Gzip-compressed JSON bytes
    Compressed {
        /// Compressed bytes
        data: Vec<u8>,
        /// Length before compression
        original_len: usize,
    },
}

impl Payload {
    /// Bytes sent to the store
    pub fn stored_len(&self) -> usize {
        match self {
            Payload::Plain { data } | Payload::Compressed { data, .. } => data.len(),
        }
    }

    /// Whether the payload is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, Payload::Compressed { .. })
    }
}

/// Encoded item as exchanged with a [`MemoryBackend`](crate::backend::MemoryBackend)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    /// Item key
    pub key: MemoryKey,
    /// Encoded value
    pub payload: Payload,
    /// Item type
    pub item_type: MemoryItemType,
    /// Writer's confidence
    pub confidence: f64,
    /// Write time
    pub created_at: DateTime<Utc>,
    /// Expiry time
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredItem {
    /// Whether the item is expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }
}

/// Ordering of query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrder {
    /// Newest first
    #[default]
    Recency,
    /// Highest confidence first, newest first among equals
    Relevance,
}

/// Query filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFilter {
    /// Restrict to one scope
    pub scope: Option<String>,
    /// Restrict to one item type
    pub item_type: Option<MemoryItemType>,
    /// Restrict to names starting with this prefix
    pub name_prefix: Option<String>,
    /// Drop items below this confidence
    pub min_confidence: Option<f64>,
    /// Result order
    pub order: QueryOrder,
}

impl MemoryFilter {
    /// Filter everything in `scope`
    pub fn in_scope(scope: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            ..Default::default()
        }
    }

    /// Restrict to an item type
    pub fn of_type(mut self, item_type: MemoryItemType) -> Self {
        self.item_type = Some(item_type);
        self
    }

    /// Restrict to a name prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Drop low-confidence items
    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    /// Set ordering
    pub fn ordered_by(mut self, order: QueryOrder) -> Self {
        self.order = order;
        self
    }

    /// Whether a stored item passes the filter (expiry aside)
    pub fn matches(&self, item: &StoredItem) -> bool {
        self.scope.as_deref().map_or(true, |scope| item.key.scope == scope)
            && self.item_type.map_or(true, |t| item.item_type == t)
            && self
                .name_prefix
                .as_deref()
                .map_or(true, |prefix| item.key.name.starts_with(prefix))
            && self.min_confidence.map_or(true, |min| item.confidence >= min)
    }

    /// Sort stored items in this filter's order. Ties break on key so
    /// paging stays stable.
    pub fn sort(&self, items: &mut [StoredItem]) {
        items.sort_by(|a, b| self.compare(&ScanPosition::from(a), &ScanPosition::from(b)));
    }

    /// Order of two positions under this filter. Positions are totally
    /// ordered: distinct keys never compare equal.
    pub fn compare(&self, a: &ScanPosition<'_>, b: &ScanPosition<'_>) -> Ordering {
        let newest_first = || b.created_at.cmp(&a.created_at).then_with(|| a.key.cmp(b.key));
        match self.order {
            QueryOrder::Recency => newest_first(),
            QueryOrder::Relevance => b.confidence.total_cmp(&a.confidence).then_with(newest_first),
        }
    }

    /// Whether `item` sorts strictly after `cursor`
    pub fn is_after(&self, item: &StoredItem, cursor: &ScanCursor) -> bool {
        self.compare(&ScanPosition::from(item), &ScanPosition::from(cursor)) == Ordering::Greater
    }
}

/// Borrowed sort key of an item
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanPosition<'a> {
    /// Writer's confidence
    pub confidence: f64,
    /// Write time
    pub created_at: DateTime<Utc>,
    /// Item key
    pub key: &'a MemoryKey,
}

impl<'a> From<&'a StoredItem> for ScanPosition<'a> {
    fn from(item: &'a StoredItem) -> Self {
        Self {
            confidence: item.confidence,
            created_at: item.created_at,
            key: &item.key,
        }
    }
}

impl<'a> From<&'a ScanCursor> for ScanPosition<'a> {
    fn from(cursor: &'a ScanCursor) -> Self {
        Self {
            confidence: cursor.confidence,
            created_at: cursor.created_at,
            key: &cursor.key,
        }
    }
}

/// Sort key of the last item of a page; the next page starts after it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCursor {
    /// Writer's confidence
    pub confidence: f64,
    /// Write time
    pub created_at: DateTime<Utc>,
    /// Item key
    pub key: MemoryKey,
}

impl From<&StoredItem> for ScanCursor {
    fn from(item: &StoredItem) -> Self {
        Self {
            confidence: item.confidence,
            created_at: item.created_at,
            key: item.key.clone(),
        }
    }
}

/// A write request
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryWrite {
    /// Target key
    pub key: MemoryKey,
    /// Value to store
    pub value: serde_json::Value,
    /// Item type
    pub item_type: MemoryItemType,
    /// Time to live; the store default applies when unset
    pub ttl: Option<Duration>,
    /// Writer's confidence
    pub confidence: f64,
}

impl MemoryWrite {
    /// Create a write with full confidence
    pub fn new(key: MemoryKey, value: serde_json::Value, item_type: MemoryItemType) -> Self {
        Self {
            key,
            value,
            item_type,
            ttl: None,
            confidence: 1.0,
        }
    }

    /// Set time to live
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set confidence
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn stored(name: &str, confidence: f64, age_secs: i64) -> StoredItem {
        StoredItem {
            key: MemoryKey::new("net", name),
            payload: Payload::Plain { data: b"1".to_vec() },
            item_type: MemoryItemType::Fact,
            confidence,
            created_at: Utc::now() - ChronoDuration::seconds(age_secs),
            expires_at: None,
        }
    }

    #[test]
    fn test_relevance_order() {
        let mut items = vec![stored("low", 0.2, 0), stored("high-old", 0.9, 50), stored("high-new", 0.9, 5)];
        MemoryFilter::default()
            .ordered_by(QueryOrder::Relevance)
            .sort(&mut items);
        let names: Vec<&str> = items.iter().map(|i| i.key.name.as_str()).collect();
        assert_eq!(names, vec!["high-new", "high-old", "low"]);
    }

    #[test]
    fn test_recency_order() {
        let mut items = vec![stored("old", 1.0, 100), stored("new", 0.1, 1)];
        MemoryFilter::default().sort(&mut items);
        assert_eq!(items[0].key.name, "new");
    }

    #[test]
    fn test_cursor_splits_order() {
        let filter = MemoryFilter::default().ordered_by(QueryOrder::Relevance);
        let mut items = vec![stored("a", 0.5, 10), stored("b", 0.5, 10), stored("c", 0.9, 0), stored("d", 0.1, 0)];
        items[1].created_at = items[0].created_at;
        filter.sort(&mut items);

        let cursor = ScanCursor::from(&items[1]);
        let after: Vec<&str> = items
            .iter()
            .filter(|item| filter.is_after(item, &cursor))
            .map(|item| item.key.name.as_str())
            .collect();
        assert_eq!(after, vec!["b", "d"]);
        assert!(!filter.is_after(&items[1], &cursor));
    }

    #[test]
    fn test_filter_matches() {
        let item = stored("subtask/plan", 0.7, 0);
        assert!(MemoryFilter::in_scope("net").with_prefix("subtask/").matches(&item));
        assert!(!MemoryFilter::in_scope("other").matches(&item));
        assert!(!MemoryFilter::default()
            .of_type(MemoryItemType::Decision)
            .matches(&item));
        assert!(!MemoryFilter::default().with_min_confidence(0.8).matches(&item));
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let mut item = stored("x", 1.0, 0);
        item.expires_at = Some(now);
        assert!(item.is_expired_at(now));
        assert!(!item.is_expired_at(now - ChronoDuration::milliseconds(1)));
    }
}
