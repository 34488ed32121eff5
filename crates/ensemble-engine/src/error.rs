//! Engine error types
//!
//! Every variant here is row-scoped: a batch resolution carries one result
//! per requested row, and one row failing never aborts its siblings. The
//! only process-fatal errors are graph construction errors, which live in
//! ensemble-core and are detected before any request is served.

use ensemble_core::CodeRef;
use thiserror::Error;

/// Row-scoped engine error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A referenced field was absent from the execution context
    #[error("missing input '{0}' in execution context")]
    MissingInput(String),

    /// A returned value's runtime shape disagrees with the declared datatype
    #[error("type mismatch for '{feature}': declared {declared}, got {got}")]
    TypeMismatch {
        feature: String,
        declared: String,
        got: String,
    },

    /// A code unit's internal logic failed
    #[error("execution failure in '{code}': {reason}")]
    ExecutionFailure { code: String, reason: String },

    /// An ML transformation's declared input datatype disagrees with the
    /// upstream value's datatype
    #[error("transformation type mismatch for '{feature}': transform expects {expected}, upstream produces {found}")]
    TransformationTypeMismatch {
        feature: String,
        expected: String,
        found: String,
    },

    /// An aggregation window selected zero records and no default is declared
    #[error("empty aggregation window for '{feature}' at as_of {as_of}")]
    EmptyWindow { feature: String, as_of: i64 },

    /// The request deadline expired during resolution
    #[error("deadline exceeded while resolving '{feature}'")]
    DeadlineExceeded { feature: String },

    /// Upstream data was missing or insufficient for this row
    #[error("incomplete upstream data for '{feature}': {reason}")]
    Incomplete { feature: String, reason: String },

    /// A code reference was not found in the registry
    #[error("unknown code reference '{0}'")]
    UnknownCode(CodeRef),

    /// The data provider collaborator failed
    #[error("data provider error: {0}")]
    Provider(String),

    /// The model collaborator failed
    #[error("model invocation error for '{model}': {reason}")]
    Model { model: String, reason: String },

    /// A blocking data check failed
    #[error("data check '{check}' failed for '{feature}': {reason}")]
    CheckFailed {
        feature: String,
        check: String,
        reason: String,
    },

    /// The requested feature does not exist in the graph
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
