use super::topics::table_from_topic;
use crate::event::{ChangeEvent, RoutingKey};
use crate::{Error, Result};
use serde_json::{Map, Value};

const OP_KEY: &str = "__op";
const TS_KEY: &str = "__ts_ms";
const SOURCE_DB_KEY: &str = "__source_db";
const SOURCE_TABLE_KEY: &str = "__source_table";
const DELETED_KEY: &str = "__deleted";

/// Decodes a flattened Debezium record into a [`ChangeEvent`].
///
/// The envelope keys stay in the payload map; SQL builders skip them.
/// A tombstone (no value, or JSON `null`) yields `Ok(None)`.
pub fn decode_message(
    topic: &str,
    partition: i32,
    offset: i64,
    payload: Option<&[u8]>,
) -> Result<Option<ChangeEvent>> {
    let Some(bytes) = payload else {
        return Ok(None);
    };

    let payload = match serde_json::from_slice::<Value>(bytes)? {
        Value::Null => return Ok(None),
        Value::Object(map) => map,
        other => {
            return Err(Error::InvalidMessage {
                message: format!("expected a JSON object, got {}", json_kind(&other)),
            })
        }
    };

    let source_table = table_from_topic(topic)
        .map(str::to_string)
        .or_else(|| string_field(&payload, SOURCE_TABLE_KEY))
        .ok_or_else(|| Error::InvalidMessage {
            message: format!("cannot determine table for topic {}", topic),
        })?;

    Ok(Some(ChangeEvent {
        op: string_field(&payload, OP_KEY).unwrap_or_default(),
        ts_ms: payload.get(TS_KEY).and_then(as_millis).unwrap_or_default(),
        source_db: string_field(&payload, SOURCE_DB_KEY).unwrap_or_default(),
        source_table,
        deleted: payload.get(DELETED_KEY).map(is_true).unwrap_or(false),
        payload,
        routing: RoutingKey::new(topic, partition),
        offset,
    }))
}

fn string_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn as_millis(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

fn is_true(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
