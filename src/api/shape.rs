//! Defensive field extraction for loosely-typed JSON responses.
//!
//! Broker and data vendors disagree on casing, nesting and whether numbers
//! arrive as strings. Everything here returns `Option` so callers decide
//! whether a missing field skips the record or fails the call.

use serde_json::Value;

/// Strip a `{"data": ...}` envelope if present
pub fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Envelope or bare value, as a list of records (a single object becomes one record)
pub fn into_records(value: Value) -> Vec<Value> {
    match unwrap_envelope(value) {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single @ Value::Object(_) => vec![single],
        _ => Vec::new(),
    }
}

/// First key present as a number (or numeric string)
pub fn number(record: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match record.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

/// First key present as a non-empty string (numbers are stringified)
pub fn string(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Symbol under any of the usual keys, including a nested `{"ticker": {"symbol": ..}}`
pub fn symbol(record: &Value) -> Option<String> {
    string(record, &["symbol", "ticker", "disSymbol"]).or_else(|| {
        record
            .get("ticker")
            .and_then(|ticker| string(ticker, &["symbol", "disSymbol"]))
            .or_else(|| {
                record
                    .get("instrument")
                    .and_then(|inst| string(inst, &["symbol", "ticker"]))
            })
    })
    .map(|s| s.to_ascii_uppercase())
}
