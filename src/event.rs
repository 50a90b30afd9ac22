use std::sync::OnceLock;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

/// A single ingestable event: an arbitrary structured body plus the
/// optional metadata the ingest API understands.
///
/// Events are immutable once constructed. The serialized size is computed
/// lazily on first use and cached, serialization is deterministic so
/// recomputing it would be wasted work.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sourcetype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nanos: Option<i32>,
    body: Value,

    #[serde(skip)]
    size: OnceLock<u64>,
}

impl Event {
    /// Create an event with the given body, stamped with the current
    /// wall-clock time in epoch milliseconds.
    pub fn new(body: Value) -> Self {
        Self {
            timestamp: Some(Utc::now().timestamp() * 1000),
            nanos: Some(0),
            body,
            ..Default::default()
        }
    }

    pub fn with_host(mut self, host: Option<String>) -> Self {
        self.host = host;
        self
    }

    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.source = source;
        self
    }

    pub fn with_sourcetype(mut self, sourcetype: Option<String>) -> Self {
        self.sourcetype = sourcetype;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64, nanos: i32) -> Self {
        self.timestamp = Some(timestamp);
        self.nanos = Some(nanos);
        self
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Serialized byte size of this event, memoized.
    ///
    /// A body that cannot be serialized yields `u64::MAX`, which makes the
    /// accumulator seal the surrounding batch and isolate the event rather
    /// than drop it.
    pub fn size(&self) -> u64 {
        *self.size.get_or_init(|| match serde_json::to_vec(self) {
            Ok(buf) => buf.len() as u64,
            Err(err) => {
                warn!(message = "failed to compute serialized event size", %err);

                u64::MAX
            }
        })
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.source == other.source
            && self.sourcetype == other.sourcetype
            && self.timestamp == other.timestamp
            && self.nanos == other.nanos
            && self.body == other.body
    }
}

impl From<Value> for Event {
    fn from(body: Value) -> Self {
        Self::new(body)
    }
}

impl From<&str> for Event {
    fn from(text: &str) -> Self {
        Self::new(Value::String(text.to_string()))
    }
}
