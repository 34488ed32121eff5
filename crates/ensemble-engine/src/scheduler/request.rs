//! Resolution requests and responses
//!
//! A request names output features and one or more (key tuple, as_of) rows.
//! Responses are row-scoped: each row carries either its values or a typed
//! error, and one row failing never blocks its siblings.

use crate::error::EngineError;
use crate::provider::KeyTuple;
use ensemble_core::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// How context is materialized: identical semantics, different strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMode {
    /// Historical batch: range scans over provider history
    Training,
    /// Live single-row: point lookups and trailing buffers
    Serving,
}

/// One row to resolve: an entity instance at a point in time
#[derive(Debug, Clone)]
pub struct RequestRow {
    pub key: KeyTuple,
    pub as_of: i64,
}

/// A resolution request
#[derive(Debug, Clone)]
pub struct ResolutionRequest {
    pub id: Uuid,
    /// Output feature names
    pub outputs: Vec<String>,
    pub rows: Vec<RequestRow>,
    pub mode: ResolutionMode,
    /// Per-request deadline in milliseconds; None falls back to the
    /// configured default, 0 disables
    pub deadline_ms: Option<u64>,
}

impl ResolutionRequest {
    pub fn new(outputs: Vec<String>, rows: Vec<RequestRow>, mode: ResolutionMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            outputs,
            rows,
            mode,
            deadline_ms: None,
        }
    }

    pub fn with_deadline_ms(mut self, ms: u64) -> Self {
        self.deadline_ms = Some(ms);
        self
    }
}

/// Per-request-row state machine. Failed is reachable from any
/// non-terminal state and carries the first failing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionState {
    #[default]
    Pending,
    ResolvingDependencies,
    Executing,
    Joining,
    Transforming,
    Complete,
    Failed,
}

/// The first failing node's identity, error kind, and the resolution
/// state the failure was observed in
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub feature: String,
    pub error: EngineError,
    pub state: ResolutionState,
}

/// Outcome for one requested row
#[derive(Debug, Clone)]
pub struct RowResult {
    pub key: KeyTuple,
    pub as_of: i64,
    pub outcome: Result<HashMap<String, Value>, RowError>,
    /// Non-fatal reports, e.g. fire-and-forget data check failures
    pub warnings: Vec<String>,
}

/// Response carrying one result per requested row, in request order
#[derive(Debug)]
pub struct ResolutionResponse {
    pub request_id: Uuid,
    pub rows: Vec<RowResult>,
}

impl ResolutionResponse {
    /// Convenience for single-row requests.
    pub fn single(&self) -> &RowResult {
        &self.rows[0]
    }
}
