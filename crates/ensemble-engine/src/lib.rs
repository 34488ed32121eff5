//! Feature computation engine
//!
//! Runtime counterpart to `ensemble-core`: data providers materialize raw
//! records, registered code executors run business logic and
//! transformations, the aggregation engine evaluates declared windows, the
//! freshness tracker decides what to recompute, and the resolution
//! scheduler drives it all in dependency order with identical semantics
//! for training and serving.

pub mod aggregation;
pub mod config;
pub mod context;
pub mod datacheck;
pub mod error;
pub mod executor;
pub mod freshness;
pub mod model;
pub mod provider;
pub mod scheduler;

pub use aggregation::AggregationEngine;
pub use config::EngineConfig;
pub use context::ExecutionContext;
pub use datacheck::{CheckOutcome, CheckRunner, CheckStage, PredicateCheckRunner};
pub use error::{EngineError, Result};
pub use executor::{CodeExecutor, CodeRegistry, RowFunction};
pub use freshness::{CachedValue, Coalesce, FreshnessTracker, InflightGuard};
pub use model::{ModelClient, StaticModelClient};
pub use provider::{key_fingerprint, DataProvider, KeyTuple, MemoryProvider, Record};
pub use scheduler::{
    RequestRow, ResolutionMode, ResolutionRequest, ResolutionResponse, ResolutionState, Resolver,
    RowError, RowResult,
};
