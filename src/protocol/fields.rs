//! Typed readers for message attributes.
//!
//! Peers built on loosely typed runtimes may send numbers as strings and
//! ids as numbers, so every reader accepts both shapes as long as the
//! value itself is well formed.

use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use crate::ids::PeerId;

/// Plain-object form of a message.
pub type PlainObject = Map<String, Value>;

pub(crate) fn object(payload: &Value) -> Result<&PlainObject> {
    payload.as_object().ok_or_else(|| SyncError::MalformedPayload {
        found: describe(payload).to_string(),
    })
}

/// Check that every declared attribute is present and non-empty.
pub(crate) fn require(obj: &PlainObject, fields: &'static [&'static str]) -> Result<()> {
    for &field in fields {
        get(obj, field)?;
    }
    Ok(())
}

pub(crate) fn peer_id(obj: &PlainObject, field: &'static str) -> Result<PeerId> {
    identifier(obj, field).map(PeerId::from)
}

pub(crate) fn identifier(obj: &PlainObject, field: &'static str) -> Result<String> {
    match get(obj, field)? {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(invalid(field, other)),
    }
}

pub(crate) fn integer(obj: &PlainObject, field: &'static str) -> Result<i64> {
    let value = get(obj, field)?;
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| invalid(field, value))
}

pub(crate) fn non_negative_decimal(obj: &PlainObject, field: &'static str) -> Result<f64> {
    let value = get(obj, field)?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite() && *f >= 0.0)
        .ok_or_else(|| invalid(field, value))
}

pub(crate) fn invalid(field: &'static str, value: &Value) -> SyncError {
    SyncError::InvalidFieldValue {
        field,
        value: value.to_string(),
    }
}

pub(crate) fn decimal_value(value: f64) -> Value {
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn get<'a>(obj: &'a PlainObject, field: &'static str) -> Result<&'a Value> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(SyncError::MissingAttribute { attribute: field }),
        Some(Value::String(s)) if s.is_empty() => {
            Err(SyncError::MissingAttribute { attribute: field })
        }
        Some(value) => Ok(value),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64).then_some(f as i64)
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
