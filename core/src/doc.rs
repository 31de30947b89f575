//! Document identity helpers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{CouchError, Result};
use crate::types::IdRev;

/// Read `_id` and `_rev` from any serializable document.
///
/// Fields that are missing, empty or not strings come back as `None`.
/// Documents that do not serialize to a JSON object are rejected.
pub fn parse_id_rev<T: Serialize + ?Sized>(doc: &T) -> Result<IdRev> {
    let value = serde_json::to_value(doc).map_err(CouchError::Serialization)?;
    let fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(CouchError::InvalidDocument(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            )))
        }
    };
    let field = |name: &str| {
        fields
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Ok(IdRev {
        id: field("_id"),
        rev: field("_rev"),
    })
}

/// Convert a value into another type by way of its JSON form.
pub fn remarshal<T: Serialize + ?Sized, U: DeserializeOwned>(doc: &T) -> Result<U> {
    let value = serde_json::to_value(doc).map_err(CouchError::Serialization)?;
    serde_json::from_value(value).map_err(CouchError::Deserialization)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
