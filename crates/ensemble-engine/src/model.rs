//! Model collaborator boundary
//!
//! Prediction features and model-encoder transformations invoke a trained
//! model through this trait. Inference itself is out of scope; the engine
//! only needs a callable surface with the model's declared batching mode.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use ensemble_core::Value;
use std::collections::HashMap;

/// Collaborator serving model invocations
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Invoke `model` with named input values; returns named outputs.
    /// The prediction value is expected under the key "prediction" unless
    /// the model returns a single output.
    async fn invoke(
        &self,
        model: &str,
        inputs: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>>;
}

/// Test double mapping model names to fixed functions
pub struct StaticModelClient {
    #[allow(clippy::type_complexity)]
    models: HashMap<String, Box<dyn Fn(&HashMap<String, Value>) -> Result<Value> + Send + Sync>>,
}

impl StaticModelClient {
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    pub fn with_model<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&HashMap<String, Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.models.insert(name.into(), Box::new(func));
        self
    }
}

impl Default for StaticModelClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelClient for StaticModelClient {
    async fn invoke(
        &self,
        model: &str,
        inputs: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>> {
        let func = self.models.get(model).ok_or_else(|| EngineError::Model {
            model: model.to_string(),
            reason: "model not registered".to_string(),
        })?;
        let value = func(inputs)?;
        let mut out = HashMap::new();
        out.insert("prediction".to_string(), value);
        Ok(out)
    }
}
