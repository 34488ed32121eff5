//! Data-check collaborator boundary
//!
//! The engine invokes checks at two points per feature: after raw input
//! materialization and after business logic. Check execution belongs to an
//! external framework; the engine reports failures and never corrects data.

use async_trait::async_trait;
use ensemble_core::Value;
use std::collections::HashMap;

/// Where in the resolution a check runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStage {
    RawInputs,
    PostBusinessLogic,
}

impl std::fmt::Display for CheckStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStage::RawInputs => write!(f, "raw_inputs"),
            CheckStage::PostBusinessLogic => write!(f, "post_business_logic"),
        }
    }
}

/// Result of one check invocation
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Passed,
    Failed { reason: String },
}

/// Collaborator executing a named data-quality check
#[async_trait]
pub trait CheckRunner: Send + Sync {
    async fn run(
        &self,
        check: &str,
        stage: CheckStage,
        feature: &str,
        values: &HashMap<String, Value>,
    ) -> CheckOutcome;
}

/// Runner that applies registered predicates; checks without a predicate pass
pub struct PredicateCheckRunner {
    #[allow(clippy::type_complexity)]
    checks: HashMap<String, Box<dyn Fn(&HashMap<String, Value>) -> CheckOutcome + Send + Sync>>,
}

impl PredicateCheckRunner {
    pub fn new() -> Self {
        Self {
            checks: HashMap::new(),
        }
    }

    pub fn with_check<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&HashMap<String, Value>) -> CheckOutcome + Send + Sync + 'static,
    {
        self.checks.insert(name.into(), Box::new(predicate));
        self
    }
}

impl Default for PredicateCheckRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckRunner for PredicateCheckRunner {
    async fn run(
        &self,
        check: &str,
        _stage: CheckStage,
        _feature: &str,
        values: &HashMap<String, Value>,
    ) -> CheckOutcome {
        match self.checks.get(check) {
            Some(predicate) => predicate(values),
            None => CheckOutcome::Passed,
        }
    }
}
