//! Code-unit and aggregation descriptors
//!
//! Business logic and ML transformations are never embedded code: a code
//! unit is a tagged, versioned function reference plus the declarations the
//! engine needs to orchestrate it — most importantly `records_needed`, which
//! determines what the scheduler materializes before invocation.

use crate::error::GraphError;
use crate::types::{DataType, Value};
use serde::{Deserialize, Serialize};

/// What records a code unit needs materialized before it can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordsNeeded {
    /// Only the current record (the default)
    SingleRecord,
    /// A window of records sharing the same group-by keys
    Aggregation,
    /// Records joined from an entity with different keys
    Join,
    /// Every record, or a statistical sample of them
    AllRecords,
}

impl Default for RecordsNeeded {
    fn default() -> Self {
        RecordsNeeded::SingleRecord
    }
}

/// Versioned reference to a registered function
///
/// Resolved through the engine's code registry at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeRef {
    pub name: String,
    pub version: String,
}

impl CodeRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for CodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// One step of a feature's business logic, executed in declared order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodeUnit {
    /// A registered function
    Function {
        code: CodeRef,
        #[serde(default)]
        records_needed: RecordsNeeded,
        /// Idempotent units may be retried on execution failure
        #[serde(default)]
        idempotent: bool,
    },
    /// A declared aggregation; records_needed is structurally Aggregation
    Aggregate(AggregationSpec),
}

impl CodeUnit {
    pub fn records_needed(&self) -> RecordsNeeded {
        match self {
            CodeUnit::Function { records_needed, .. } => *records_needed,
            CodeUnit::Aggregate(_) => RecordsNeeded::Aggregation,
        }
    }
}

/// Built-in aggregate functions, plus custom delegation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    Sum,
    Count,
    Max,
    Min,
    Avg,
    /// Delegates to a registered function that receives the materialized window
    Custom(CodeRef),
}

/// Behavior when an aggregation window selects zero records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyWindowPolicy {
    /// Yield this value
    Default(Value),
    /// Surface an EmptyWindow error for the row
    Fail,
}

/// Sort direction for count-window ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Ordering specification used to select "last N" records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub fields: Vec<String>,
    pub direction: SortDirection,
}

/// Aggregation window: a trailing duration or a record count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    /// Trailing duration in seconds; evaluated half-open [as_of - secs, as_of)
    Time { secs: i64 },
    /// The N most recent records per group key
    LastN { n: usize },
}

impl Window {
    /// Parse the declarative window grammar: "7d", "5h", "3m", "1s", "5n".
    pub fn parse(spec: &str) -> Result<Self, GraphError> {
        let spec = spec.trim();
        if spec.len() < 2 {
            return Err(GraphError::InvalidWindow(spec.to_string()));
        }
        let (num, unit) = spec.split_at(spec.len() - 1);
        let value: i64 = num
            .parse()
            .map_err(|_| GraphError::InvalidWindow(spec.to_string()))?;
        if value <= 0 {
            return Err(GraphError::InvalidWindow(spec.to_string()));
        }
        match unit {
            "d" => Ok(Window::Time { secs: value * 86_400 }),
            "h" => Ok(Window::Time { secs: value * 3_600 }),
            "m" => Ok(Window::Time { secs: value * 60 }),
            "s" => Ok(Window::Time { secs: value }),
            "n" => Ok(Window::LastN { n: value as usize }),
            _ => Err(GraphError::InvalidWindow(spec.to_string())),
        }
    }
}

/// A declared aggregation (GROUP BY over a window)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    /// Aggregate function applied over the window
    pub function: AggregateFunction,

    /// Field whose values are aggregated
    pub target: String,

    /// Fields we aggregate by; records are grouped on these before windowing
    pub group_by: Vec<String>,

    /// The window of records selected per group
    pub window: Window,

    /// Ordering for count windows; defaults to the entity timestamp, descending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,

    /// Declared behavior for an empty window
    pub on_empty: EmptyWindowPolicy,
}

impl AggregationSpec {
    /// Construct with the documented default empty-window policy:
    /// SUM/COUNT yield 0, MAX/MIN/AVG/CUSTOM fail unless a default is declared.
    pub fn new(
        function: AggregateFunction,
        target: impl Into<String>,
        group_by: Vec<String>,
        window: Window,
    ) -> Self {
        let on_empty = match function {
            AggregateFunction::Sum | AggregateFunction::Count => {
                EmptyWindowPolicy::Default(Value::Int(0))
            }
            _ => EmptyWindowPolicy::Fail,
        };
        Self {
            function,
            target: target.into(),
            group_by,
            window,
            order_by: None,
            on_empty,
        }
    }

    pub fn with_order_by(mut self, fields: Vec<String>, direction: SortDirection) -> Self {
        self.order_by = Some(OrderBy { fields, direction });
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.on_empty = EmptyWindowPolicy::Default(value);
        self
    }
}

/// ML transformation: human-readable value in, model-readable value out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MlTransform {
    /// A registered transformation function
    Custom {
        code: CodeRef,
        input_datatype: DataType,
        output_datatype: DataType,
        /// SingleRecord or AllRecords; joins and aggregations have no use here
        #[serde(default)]
        records_needed: RecordsNeeded,
    },
    /// Applies another model to the value, e.g. an embedding encoder
    ModelEncoder {
        model: String,
        input_datatype: DataType,
        output_datatype: DataType,
    },
}

impl MlTransform {
    pub fn input_datatype(&self) -> &DataType {
        match self {
            MlTransform::Custom { input_datatype, .. } => input_datatype,
            MlTransform::ModelEncoder { input_datatype, .. } => input_datatype,
        }
    }

    pub fn output_datatype(&self) -> &DataType {
        match self {
            MlTransform::Custom { output_datatype, .. } => output_datatype,
            MlTransform::ModelEncoder { output_datatype, .. } => output_datatype,
        }
    }
}

/// How a model consumes records at invocation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchingMode {
    /// One invocation per resolved row (the default)
    #[default]
    SingleRecord,
    /// One invocation over the full record set
    AllRecords,
}

/// Model metadata referenced by Prediction features and model encoders
///
/// Input features and the output datatype of a Prediction node come from
/// here, never from user declarations on the feature itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub version: String,
    /// Feature names the model consumes, in input order
    pub input_features: Vec<String>,
    /// Runtime datatype of the model's output
    pub output_datatype: DataType,
    /// Declared batching mode
    #[serde(default)]
    pub batching: BatchingMode,
}

/// Data-quality checks attached to a feature
///
/// The engine invokes these at two points: after raw input materialization
/// and after business logic. Check execution itself is a collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckSet {
    #[serde(default)]
    pub raw_inputs: Vec<String>,
    #[serde(default)]
    pub post_business_logic: Vec<String>,
}
