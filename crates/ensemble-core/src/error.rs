//! Error types for graph construction
//!
//! All of these are build-time fatal: a graph that fails to construct serves
//! no requests. Per-request errors live in the engine crate.

use thiserror::Error;

/// Graph construction error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// The dependency graph contains a cycle
    #[error("cyclic dependency involving feature '{0}'")]
    CyclicDependency(String),

    /// An input_feature or input_lookup names a feature that does not exist
    #[error("feature '{feature}' references unknown feature '{reference}'")]
    UnknownReference { feature: String, reference: String },

    /// A lookup's entity keys are not covered by the declaring feature's inputs
    #[error("feature '{feature}' looks up entity '{entity}' but does not include its key '{key}' among input_features")]
    KeyMismatch {
        feature: String,
        entity: String,
        key: String,
    },

    /// Two features share a name within the namespace
    #[error("duplicate feature name '{0}'")]
    DuplicateFeature(String),

    /// An entity schema is referenced but was never registered
    #[error("feature '{feature}' references unknown entity '{entity}'")]
    UnknownEntity { feature: String, entity: String },

    /// A definition violates the rules of its variant tag
    #[error("invalid definition for feature '{feature}': {reason}")]
    InvalidDefinition { feature: String, reason: String },

    /// A window string could not be parsed
    #[error("invalid window specification '{0}'")]
    InvalidWindow(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;
