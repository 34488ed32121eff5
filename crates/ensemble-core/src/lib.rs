//! Ensemble Core - data model for the Ensemble feature computation engine
//!
//! This crate provides the static, build-time side of the engine:
//! - Runtime value and datatype descriptors
//! - Feature definitions (one record type plus a closed variant tag)
//! - Code-unit and aggregation descriptors
//! - The validated feature graph with deterministic topological resolution
//!
//! Everything here is pure: graph construction validates and fails fast,
//! but performs no I/O and holds no runtime state.

pub mod error;
pub mod feature;
pub mod graph;
pub mod types;

// Re-export commonly used types
pub use error::GraphError;
pub use feature::{
    AggregateFunction, AggregationSpec, BatchingMode, CheckSet, CodeRef, CodeUnit,
    EmptyWindowPolicy, FeatureDefinition, FeatureKind, LookupSpec, MlTransform, ModelDescriptor,
    OrderBy, RecordsNeeded, SortDirection, Window,
};
pub use graph::{FeatureGraph, FeatureGraphBuilder};
pub use types::{DataType, EntitySchema, Value};
