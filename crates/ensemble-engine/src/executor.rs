//! Code executor abstraction
//!
//! The engine is backend-agnostic: business logic, join resolvers, custom
//! aggregates and ML transformations all implement `CodeExecutor` and are
//! resolved through a registry by versioned reference at execution time.
//! The engine only needs each unit's declared `records_needed` mode and
//! type contract.

use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use ensemble_core::{CodeRef, RecordsNeeded, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A registered, executable computation unit
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// What the scheduler must materialize before invocation
    fn records_needed(&self) -> RecordsNeeded {
        RecordsNeeded::SingleRecord
    }

    /// Idempotent units may be retried on ExecutionFailure
    fn idempotent(&self) -> bool {
        false
    }

    /// Run the unit against exactly the context its mode requires.
    /// Returns a map of output field name to value.
    async fn execute(&self, ctx: &ExecutionContext) -> Result<HashMap<String, Value>>;
}

/// Registry mapping versioned code references to executors
#[derive(Default)]
pub struct CodeRegistry {
    executors: HashMap<CodeRef, Arc<dyn CodeExecutor>>,
}

impl CodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, code: CodeRef, executor: Arc<dyn CodeExecutor>) {
        self.executors.insert(code, executor);
    }

    pub fn get(&self, code: &CodeRef) -> Result<Arc<dyn CodeExecutor>> {
        self.executors
            .get(code)
            .cloned()
            .ok_or_else(|| EngineError::UnknownCode(code.clone()))
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

/// Adapter wrapping a plain closure as a single-record executor.
/// The common case for row-wise business logic in fixtures and tests.
pub struct RowFunction<F> {
    func: F,
    idempotent: bool,
}

impl<F> RowFunction<F>
where
    F: Fn(&ExecutionContext) -> Result<HashMap<String, Value>> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            idempotent: true,
        }
    }

    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }
}

#[async_trait]
impl<F> CodeExecutor for RowFunction<F>
where
    F: Fn(&ExecutionContext) -> Result<HashMap<String, Value>> + Send + Sync,
{
    fn idempotent(&self) -> bool {
        self.idempotent
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<HashMap<String, Value>> {
        (self.func)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_resolves_by_ref() {
        let mut registry = CodeRegistry::new();
        registry.register(
            CodeRef::new("double", "1.0"),
            Arc::new(RowFunction::new(|ctx: &ExecutionContext| {
                let amount = ctx.require_f64("amount")?;
                let mut out = HashMap::new();
                out.insert("doubled".to_string(), Value::Float(amount * 2.0));
                Ok(out)
            })),
        );

        let executor = registry.get(&CodeRef::new("double", "1.0")).unwrap();
        let mut ctx = ExecutionContext::default();
        ctx.insert("amount", Value::Int(21));
        let out = executor.execute(&ctx).await.unwrap();
        assert_eq!(out["doubled"], Value::Float(42.0));
    }

    #[tokio::test]
    async fn test_registry_unknown_code() {
        let registry = CodeRegistry::new();
        let missing = CodeRef::new("ghost", "0.1");
        assert_eq!(
            registry.get(&missing).err(),
            Some(EngineError::UnknownCode(missing))
        );
    }

    #[tokio::test]
    async fn test_missing_input_surfaces() {
        let func = RowFunction::new(|ctx: &ExecutionContext| {
            ctx.require("absent")?;
            Ok(HashMap::new())
        });
        let err = func.execute(&ExecutionContext::default()).await.unwrap_err();
        assert_eq!(err, EngineError::MissingInput("absent".into()));
    }
}
