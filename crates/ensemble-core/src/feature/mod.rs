//! Feature definitions and code-unit descriptors

pub mod code;
pub mod definition;

pub use code::{
    AggregateFunction, AggregationSpec, BatchingMode, CheckSet, CodeRef, CodeUnit,
    EmptyWindowPolicy, MlTransform, ModelDescriptor, OrderBy, RecordsNeeded, SortDirection,
    Window,
};
pub use definition::{FeatureDefinition, FeatureKind, LookupSpec};
