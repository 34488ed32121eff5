//! Runtime value types
//!
//! `Value` represents every runtime value the engine moves between code
//! units: raw provider cells, derived feature values, and model-readable
//! vectors after ML transformation.

use serde::{Deserialize, Serialize};

/// Runtime value type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null / missing value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (also carries epoch-second timestamps)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    Text(String),
    /// Numeric vector (model-readable embeddings, multi-class outputs)
    Vector(Vec<f64>),
}

impl Value {
    /// Numeric view of the value, if it has one. Aggregations operate on
    /// this so that Int and Float columns aggregate uniformly.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Epoch-second view, for timestamp fields.
    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the runtime shape, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Vector(_) => "vector",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Vector(v)
    }
}
