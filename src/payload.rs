//! Event payload type for MAJAKKA
//!
//! A [`Payload`] is an insertion-ordered mapping of string keys to JSON
//! values. Insertion order is preserved end-to-end so that GET query
//! strings and POST bodies come out in the order producers added fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Key under which the sent-timestamp is injected right before dispatch
pub const SENT_TIMESTAMP_KEY: &str = "stm";

/// An ordered collection of key/value pairs making up one event
///
/// # Example
///
/// ```
/// use majakka::Payload;
///
/// let mut payload = Payload::new();
/// payload.add("e", "pv");
/// payload.add("url", "https://example.com");
/// assert_eq!(payload.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// Create an empty payload
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Add a string value under `key`
    ///
    /// Empty keys and empty values are skipped - the collector rejects
    /// them, so they are dropped here instead of at send time.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if key.is_empty() || value.is_empty() {
            debug!(%key, "skipping empty payload entry");
            return;
        }
        self.0.insert(key, Value::String(value));
    }

    /// Add an arbitrary JSON value under `key`
    ///
    /// Null values are skipped, mirroring [`Payload::add`].
    pub fn add_value(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if key.is_empty() || value.is_null() {
            debug!(%key, "skipping empty payload entry");
            return;
        }
        self.0.insert(key, value);
    }

    /// Merge all entries of `other` into this payload
    pub fn add_map(&mut self, other: Map<String, Value>) {
        for (key, value) in other {
            self.add_value(key, value);
        }
    }

    /// Inject the sent-timestamp (`stm`) as a string of epoch milliseconds
    ///
    /// Called once per delivery attempt, immediately before the payload is
    /// packed into a request. Overwrites any previous value so retried
    /// events carry the timestamp of their latest attempt.
    pub fn add_sent_timestamp(&mut self, epoch_millis: i64) {
        self.0.insert(
            SENT_TIMESTAMP_KEY.to_string(),
            Value::String(epoch_millis.to_string()),
        );
    }

    /// Encoded size of this payload in bytes
    ///
    /// This is the length of the JSON encoding, which is what the byte
    /// limits in the batcher are checked against.
    pub fn byte_size(&self) -> usize {
        serde_json::to_string(&self.0).map_or(0, |s| s.len())
    }

    /// Value stored under `key`, if any
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload has no entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying ordered map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl IntoIterator for Payload {
    type Item = (String, Value);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
