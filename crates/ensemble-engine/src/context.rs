//! Execution context
//!
//! A context supplies exactly the records a code unit's `records_needed`
//! mode requires: one row, a window, joined rows, or a full table — never
//! more, never less. This isolation is what lets the same unit run
//! identically under batch (training) and point (serving) resolution.

use crate::error::{EngineError, Result};
use crate::provider::{KeyTuple, Record};
use ensemble_core::Value;
use std::collections::HashMap;

/// Context handed to a code executor
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Key tuple of the row being resolved
    pub key: KeyTuple,

    /// Point in time the value is requested for
    pub as_of: i64,

    /// Single-record inputs: upstream feature values plus prior step outputs
    pub row: HashMap<String, Value>,

    /// Materialized window, present only for Aggregation units
    pub window: Vec<Record>,

    /// Joined rows per lookup entity, present only for Join units
    pub lookups: HashMap<String, HashMap<String, Value>>,

    /// Full (or sampled) table, present only for AllRecords units
    pub table: Vec<Record>,
}

impl ExecutionContext {
    pub fn new(key: KeyTuple, as_of: i64) -> Self {
        Self {
            key,
            as_of,
            ..Default::default()
        }
    }

    /// Fetch a required input field, or fail with MissingInput.
    pub fn require(&self, field: &str) -> Result<&Value> {
        self.row
            .get(field)
            .ok_or_else(|| EngineError::MissingInput(field.to_string()))
    }

    /// Fetch a required numeric input field.
    pub fn require_f64(&self, field: &str) -> Result<f64> {
        let value = self.require(field)?;
        value.as_f64().ok_or_else(|| EngineError::TypeMismatch {
            feature: field.to_string(),
            declared: "numeric".to_string(),
            got: value.type_name().to_string(),
        })
    }

    /// Fetch a required field from a lookup entity's joined row.
    pub fn require_lookup(&self, entity: &str, field: &str) -> Result<&Value> {
        self.lookups
            .get(entity)
            .and_then(|row| row.get(field))
            .ok_or_else(|| EngineError::MissingInput(format!("{entity}.{field}")))
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.row.insert(field.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_reports_missing_input() {
        let ctx = ExecutionContext::new(KeyTuple::new(), 100);
        let err = ctx.require("amount").unwrap_err();
        assert_eq!(err, EngineError::MissingInput("amount".into()));
    }

    #[test]
    fn test_require_f64_rejects_text() {
        let mut ctx = ExecutionContext::new(KeyTuple::new(), 100);
        ctx.insert("amount", Value::Text("oops".into()));
        assert!(matches!(
            ctx.require_f64("amount").unwrap_err(),
            EngineError::TypeMismatch { .. }
        ));

        ctx.insert("amount", Value::Int(7));
        assert_eq!(ctx.require_f64("amount").unwrap(), 7.0);
    }

    #[test]
    fn test_require_lookup() {
        let mut ctx = ExecutionContext::new(KeyTuple::new(), 100);
        let mut row = HashMap::new();
        row.insert("total".to_string(), Value::Float(9.5));
        ctx.lookups.insert("orders".to_string(), row);

        assert_eq!(ctx.require_lookup("orders", "total").unwrap(), &Value::Float(9.5));
        assert!(ctx.require_lookup("orders", "missing").is_err());
    }
}
