//! Conversion between [`Value`] and `serde_json::Value`.
//!
//! JSON has no notion of shared references, dates, guids or byte blocks, so
//! the mapping is lossy in that direction:
//!
//! | hprose            | JSON                                   |
//! |-------------------|----------------------------------------|
//! | `Date`            | ISO-8601 string, `Z` suffix when UTC   |
//! | `Guid`            | hyphenated string                      |
//! | `Bytes`           | array of numbers                       |
//! | `Map`             | object; non-string keys use their JSON text |
//! | `Object`          | object of its fields (class name dropped) |

use serde_json::{Map as JsonMap, Number, Value as JsonValue};

use super::error::{HproseError, Result};
use super::value::{List, Map, Value};

/// Converts a value graph to JSON.
///
/// # Errors
///
/// [`HproseError::Encoding`] for NaN or infinite doubles and for cyclic graphs.
pub fn to_json(value: &Value) -> Result<JsonValue> {
    let mut ancestors = Vec::new();
    to_json_inner(value, &mut ancestors)
}

fn to_json_inner(value: &Value, ancestors: &mut Vec<usize>) -> Result<JsonValue> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Integer(i) => JsonValue::from(*i),
        Value::Long(l) => JsonValue::from(*l),
        Value::Double(d) => Number::from_f64(*d)
            .map(JsonValue::Number)
            .ok_or_else(|| HproseError::Encoding(format!("{} has no JSON representation", d)))?,
        Value::String(s) => JsonValue::String(s.to_string()),
        Value::Bytes(b) => JsonValue::Array(b.iter().map(|&x| JsonValue::from(x)).collect()),
        Value::Date(d) => {
            let mut text = d.value.format("%Y-%m-%dT%H:%M:%S%.f").to_string();
            if d.utc {
                text.push('Z');
            }
            JsonValue::String(text)
        }
        Value::Guid(g) => JsonValue::String(g.hyphenated().to_string()),
        Value::List(_) | Value::Map(_) | Value::Object(_) => {
            let id = value.identity().unwrap_or_default();
            if ancestors.contains(&id) {
                return Err(HproseError::Encoding(
                    "cyclic value has no JSON representation".into(),
                ));
            }
            ancestors.push(id);
            let converted = container_to_json(value, ancestors);
            ancestors.pop();
            converted?
        }
    })
}

fn container_to_json(value: &Value, ancestors: &mut Vec<usize>) -> Result<JsonValue> {
    match value {
        Value::List(list) => {
            let items = list.to_vec();
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                out.push(to_json_inner(item, ancestors)?);
            }
            Ok(JsonValue::Array(out))
        }
        Value::Map(map) => {
            let entries = map.read().clone();
            let mut out = JsonMap::new();
            for (k, v) in &entries {
                let key = match k {
                    Value::String(s) => s.to_string(),
                    other => to_json_inner(other, ancestors)?.to_string(),
                };
                out.insert(key, to_json_inner(v, ancestors)?);
            }
            Ok(JsonValue::Object(out))
        }
        Value::Object(object) => {
            let fields = object.read().fields.clone();
            let mut out = JsonMap::new();
            for (name, v) in &fields {
                out.insert(name.clone(), to_json_inner(v, ancestors)?);
            }
            Ok(JsonValue::Object(out))
        }
        _ => to_json_inner(value, ancestors),
    }
}

/// Converts JSON to a value. Integers that fit `i32` become `Integer`, wider
/// ones `Long`; everything else numeric becomes `Double`.
pub fn from_json(json: &JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                match i32::try_from(i) {
                    Ok(small) => Value::Integer(small),
                    Err(_) => Value::Long(i),
                }
            } else {
                Value::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(s) => Value::from(s.as_str()),
        JsonValue::Array(items) => Value::List(List::new(items.iter().map(from_json).collect())),
        JsonValue::Object(fields) => Value::Map(Map::new(
            fields
                .iter()
                .map(|(k, v)| (Value::from(k.as_str()), from_json(v)))
                .collect(),
        )),
    }
}
