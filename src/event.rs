use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Payload keys starting with this prefix are envelope metadata, never columns.
pub const METADATA_PREFIX: &str = "__";

pub fn is_metadata_key(key: &str) -> bool {
    key.starts_with(METADATA_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Unknown,
}

impl Operation {
    /// Maps a Debezium operation code; `r` is a snapshot read and applies as an insert.
    pub fn from_code(code: &str) -> Self {
        match code {
            "c" | "r" => Operation::Insert,
            "u" => Operation::Update,
            "d" => Operation::Delete,
            _ => Operation::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source stream ordering unit an event arrived on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingKey {
    pub topic: String,
    pub partition: i32,
}

impl RoutingKey {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Raw operation code as sent by the capture layer.
    pub op: String,
    pub ts_ms: i64,
    pub source_db: String,
    pub source_table: String,
    pub deleted: bool,
    pub payload: Map<String, Value>,
    pub routing: RoutingKey,
    pub offset: i64,
}

impl ChangeEvent {
    pub fn operation(&self) -> Operation {
        Operation::from_code(&self.op)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.ts_ms)
    }

    /// Payload entries that map to table columns.
    pub fn columns(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.payload.iter().filter(|(k, _)| !is_metadata_key(k))
    }
}
