//! Structured observability events
//!
//! Circuit breakers, the fallback chain and the coordinator report what they
//! do as [`EventRecord`]s (name, labels, timestamp, value). Where the records
//! end up is decided by the [`EventSink`] handed to each component at
//! construction time.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

/// A single structured event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Dotted event name, e.g. `circuit_breaker.state_change`
    pub name: String,
    /// Dimension labels
    pub labels: BTreeMap<String, String>,
    /// When the event was produced
    pub timestamp: DateTime<Utc>,
    /// Numeric value (duration in ms, state code, cost...)
    pub value: f64,
}

impl EventRecord {
    /// Create a new event stamped with the current time
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            timestamp: Utc::now(),
            value,
        }
    }

    /// Attach a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.labels.insert(key.into(), value.to_string());
        self
    }

    /// Look up a label value
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Destination for observability events
pub trait EventSink: Send + Sync {
    /// Publish a record. Must not block for long; callers may hold
    /// short-lived state while emitting.
    fn emit(&self, record: EventRecord);
}

/// Shared handle to a sink
pub type SharedSink = Arc<dyn EventSink>;

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _record: EventRecord) {}
}

/// Sink that forwards events to the `tracing` subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, record: EventRecord) {
        info!(
            target: "agentmesh::events",
            event = %record.name,
            value = record.value,
            labels = ?record.labels,
            timestamp = %record.timestamp.to_rfc3339(),
            "event"
        );
    }
}

/// Sink that keeps every record in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<EventRecord>>,
}

impl RecordingSink {
    /// Create an empty recording sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All records received so far, in emission order
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    /// Records with the given name
    pub fn named(&self, name: &str) -> Vec<EventRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    /// Number of records received
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drop all recorded events
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, record: EventRecord) {
        self.records.lock().push(record);
    }
}

/// Convenience constructor for a sink that drops events
pub fn noop_sink() -> SharedSink {
    Arc::new(NoopSink)
}
