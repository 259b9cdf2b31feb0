//! WebSocket frames exchanged between collector, server and viewers.
//!
//! The collector produces [`UplinkMessage`]s. The server decodes whatever
//! arrives into an [`InboundMessage`] once, at the socket boundary, and from
//! then on only handles the tagged variants.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::BATCH_TYPE;
use crate::record::TelemetryRecord;

/// An ordered bundle of records sent as a single frame.
///
/// Wire shape: `{"type": "batch", "timestamp": 1718000000.5, "count": 2, "data": [..]}`.
/// Fields are private so that a batch cannot change after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "batch")]
pub struct Batch<T = TelemetryRecord> {
    timestamp: f64,
    count: usize,
    data: Vec<T>,
}

impl<T> Batch<T> {
    /// Freezes `records` into a batch stamped with `timestamp`.
    pub fn new(records: Vec<T>, timestamp: f64) -> Self {
        Self {
            timestamp,
            count: records.len(),
            data: records,
        }
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// The count announced by the sender.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn records(&self) -> &[T] {
        &self.data
    }

    /// The most recent record, i.e. the last one in the batch.
    pub fn latest(&self) -> Option<&T> {
        self.data.last()
    }

    pub fn into_records(self) -> Vec<T> {
        self.data
    }
}

/// What the collector sends upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UplinkMessage {
    Batch(Batch),
    Single(TelemetryRecord),
}

impl UplinkMessage {
    /// Serializes to the JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Number of records carried by this frame.
    pub fn record_count(&self) -> usize {
        match self {
            Self::Batch(batch) => batch.records().len(),
            Self::Single(_) => 1,
        }
    }
}

/// A text frame received by the server, decoded once.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A `{"type": "batch", ...}` frame.
    Batch(Batch<Value>),
    /// Any other JSON value, forwarded as-is.
    Single(Value),
    /// Not JSON, or a batch envelope with the wrong shape. Passed through untouched.
    Undecodable(String),
}

impl InboundMessage {
    pub fn decode(text: &str) -> Self {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => return Self::Undecodable(text.to_string()),
        };

        if value.get("type").and_then(Value::as_str) == Some(BATCH_TYPE) {
            return match serde_json::from_value(value) {
                Ok(batch) => Self::Batch(batch),
                Err(_) => Self::Undecodable(text.to_string()),
            };
        }

        Self::Single(value)
    }

    /// Collapses the frame to the payload viewers should see.
    ///
    /// A batch contributes only its latest record; an empty batch
    /// contributes nothing.
    pub fn into_payload(self) -> Option<Payload> {
        match self {
            Self::Batch(batch) => batch.into_records().pop().map(Payload::Json),
            Self::Single(value) => Some(Payload::Json(value)),
            Self::Undecodable(raw) => Some(Payload::Raw(raw)),
        }
    }

    /// Records carried by this frame that match the [`TelemetryRecord`] schema,
    /// oldest first.
    pub fn records(&self) -> Vec<TelemetryRecord> {
        match self {
            Self::Batch(batch) => batch
                .records()
                .iter()
                .filter_map(|v| TelemetryRecord::deserialize(v).ok())
                .collect(),
            Self::Single(value) => TelemetryRecord::deserialize(value).ok().into_iter().collect(),
            Self::Undecodable(_) => Vec::new(),
        }
    }
}

/// A frame pushed to every subscriber.
///
/// Equality is structural for JSON (key order is irrelevant) and byte-wise
/// for raw text.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Raw(String),
}

impl Payload {
    pub fn to_text(&self) -> String {
        match self {
            Self::Json(value) => value.to_string(),
            Self::Raw(raw) => raw.clone(),
        }
    }
}
