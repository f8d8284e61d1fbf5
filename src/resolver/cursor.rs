use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::resolver::Row;

/// Normalizes a row value for inclusion in a cursor. Numbers and nulls pass
/// through; RFC 3339 timestamps become `YYYY-MM-DD HH:mm:ss.sss` in UTC so
/// string comparison in the store matches chronological order; everything
/// else stringifies.
pub fn cursor_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Number(_) => value.clone(),
        Value::String(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => Value::String(
                dt.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            ),
            Err(_) => value.clone(),
        },
        other => Value::String(other.to_string()),
    }
}

/// Encodes the row's sort-key values as an opaque token. Field order follows
/// `columns`, so the token is stable for a given cursor-column list.
pub fn encode_cursor(row: &Row, columns: &[String]) -> String {
    let mut fields = Row::new();
    for column in columns {
        let value = row.get(column).unwrap_or(&Value::Null);
        fields.insert(column.clone(), cursor_value(value));
    }
    STANDARD.encode(Value::Object(fields).to_string())
}

/// Decodes a cursor back into its field map. Returns `None` for anything
/// malformed; callers treat that as "no boundary" rather than an error.
pub fn decode_cursor(cursor: &str) -> Option<Row> {
    let bytes = STANDARD.decode(cursor).ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(fields) => Some(fields),
        _ => None,
    }
}
