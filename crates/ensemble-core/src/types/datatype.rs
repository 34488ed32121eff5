//! Datatype descriptors
//!
//! Each feature declares a human-readable datatype; ML transformations add
//! model-readable ones. The engine uses these tags to validate code-unit
//! output shapes and transformation chains, never to convert values itself.

use crate::types::Value;
use serde::{Deserialize, Serialize};

/// Declared datatype of a feature value
///
/// `human_readable` / `model_readable` classify each variant: a model can
/// only consume model-readable datatypes, so a feature whose chain ends on a
/// human-only datatype needs an ML transformation before serving.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataType {
    /// Free-form text. Human-readable only.
    Text,
    /// Boolean flag. Human-readable only.
    Boolean,
    /// Timestamp (epoch seconds at runtime). Human-readable only.
    Timestamp,
    /// Reference to an image file. Human-readable only.
    ImageFile,
    /// Reference to an audio file. Human-readable only.
    AudioFile,
    /// Fixed-length f32 vector (embeddings). Model-readable only.
    FloatVector { len: usize },
    /// Fixed-length f64 vector. Model-readable only.
    DoubleVector { len: usize },
    /// 32-bit integer. Both.
    Int32,
    /// 64-bit integer. Both.
    Int64,
    /// 32-bit float. Both.
    Float32,
    /// 64-bit float. Both.
    Float64,
}

impl DataType {
    pub fn human_readable(&self) -> bool {
        !matches!(self, DataType::FloatVector { .. } | DataType::DoubleVector { .. })
    }

    pub fn model_readable(&self) -> bool {
        matches!(
            self,
            DataType::FloatVector { .. }
                | DataType::DoubleVector { .. }
                | DataType::Int32
                | DataType::Int64
                | DataType::Float32
                | DataType::Float64
        )
    }

    /// Check a runtime value against this declared datatype.
    ///
    /// Null is accepted everywhere; missing data is a context concern, not a
    /// shape mismatch. Vector variants also check the declared length.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (DataType::Text | DataType::ImageFile | DataType::AudioFile, Value::Text(_)) => true,
            (DataType::Boolean, Value::Bool(_)) => true,
            (DataType::Timestamp, Value::Int(_)) => true,
            (DataType::Int32 | DataType::Int64, Value::Int(_)) => true,
            (DataType::Float32 | DataType::Float64, Value::Float(_) | Value::Int(_)) => true,
            (DataType::FloatVector { len } | DataType::DoubleVector { len }, Value::Vector(v)) => {
                v.len() == *len
            }
            _ => false,
        }
    }
}
