//! Records in and out of parameter sets.
//!
//! The engine never looks inside user types itself. A record is anything
//! `serde` can serialize to a map; rows come back out through
//! `Deserialize`. Nested values (sequences, maps) travel as JSON text.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value as Json};

use crate::error::{Error, Result};
use crate::params::{NamedValueMap, ParameterSet};
use crate::value::Value;

/// Flattens a record into name → value pairs.
///
/// # Errors
///
/// `Conversion` when the record does not serialize to a map.
pub fn to_named_values<T: Serialize + ?Sized>(record: &T) -> Result<NamedValueMap> {
    let json = serde_json::to_value(record).map_err(|e| Error::Conversion(e.to_string()))?;
    let Json::Object(fields) = json else {
        return Err(Error::Conversion(format!(
            "{} does not serialize to a map of fields",
            type_label::<T>()
        )));
    };
    Ok(fields
        .into_iter()
        .map(|(name, value)| (name, from_json(value)))
        .collect())
}

/// Short type name of `T`, used to namespace its fields when merged.
pub fn type_label<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_owned()
}

/// Builds a record from one row.
///
/// # Errors
///
/// `Conversion` when the row's columns do not fit `T`.
pub fn from_row<T: DeserializeOwned>(row: &ParameterSet) -> Result<T> {
    let mut fields = Map::with_capacity(row.len());
    for param in row {
        fields
            .entry(param.name.clone())
            .or_insert_with(|| to_json(&param.value));
    }
    serde_json::from_value(Json::Object(fields)).map_err(|e| Error::Conversion(e.to_string()))
}

fn from_json(value: Json) -> Value {
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map_or(Value::Null, Value::Float),
        },
        Json::String(s) => Value::Text(s),
        nested @ (Json::Array(_) | Json::Object(_)) => Value::Text(nested.to_string()),
    }
}

fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number(Number::from(*i)),
        Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Text(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::Array(b.iter().map(|byte| Json::from(*byte)).collect()),
    }
}
