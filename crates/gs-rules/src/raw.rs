// raw.rs — Uninterpreted evaluator output.

use serde_json::Value;

use gs_policy::document::value_to_string;

/// The raw value an evaluator produced for a query, before any verdict mode
/// is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum RawVerdict {
    /// The query path has no value (no rule produced output).
    Undefined,
    Null,
    Bool(bool),
    /// A set, array or object of results. Objects contribute their keys.
    Collection(Vec<String>),
    /// Numbers, strings and anything else.
    Other(Value),
}

impl RawVerdict {
    /// Classify a JSON value; `None` is an undefined result.
    pub fn from_value(value: Option<Value>) -> Self {
        match value {
            None => RawVerdict::Undefined,
            Some(Value::Null) => RawVerdict::Null,
            Some(Value::Bool(b)) => RawVerdict::Bool(b),
            Some(Value::Array(items)) => {
                RawVerdict::Collection(items.iter().map(value_to_string).collect())
            }
            Some(Value::Object(map)) => RawVerdict::Collection(map.keys().cloned().collect()),
            Some(other) => RawVerdict::Other(other),
        }
    }

    /// Short shape description used in type-mismatch errors and reports.
    pub fn describe(&self) -> String {
        match self {
            RawVerdict::Undefined => "undefined".to_string(),
            RawVerdict::Null => "null".to_string(),
            RawVerdict::Bool(b) => format!("boolean ({b})"),
            RawVerdict::Collection(items) => format!("collection of {}", items.len()),
            RawVerdict::Other(Value::Number(_)) => "number".to_string(),
            RawVerdict::Other(Value::String(_)) => "string".to_string(),
            RawVerdict::Other(_) => "value".to_string(),
        }
    }

    /// Messages carried by a collection result; empty for other shapes.
    pub fn messages(&self) -> &[String] {
        match self {
            RawVerdict::Collection(items) => items,
            _ => &[],
        }
    }
}
