//! Feature definitions
//!
//! One record type plus a closed variant tag. The original design expressed
//! raw features, keys, timestamps, labels and predictions as a subclass
//! hierarchy with nulled-out fields; here the variant tag carries the
//! per-kind data and `validate` enforces which fields each kind may use.

use crate::error::GraphError;
use crate::feature::code::{CheckSet, CodeUnit, MlTransform, ModelDescriptor};
use crate::types::DataType;
use serde::{Deserialize, Serialize};

/// Closed variant tag for feature definitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureKind {
    /// Comes unmodified from a data provider; freshness follows the
    /// provider's update cadence and is never user-settable
    Raw,
    /// Computed by the engine from declared inputs
    Derived,
    /// Identity key field; no logic, freshness or datatype conversion
    Key,
    /// Record timestamp; orders windowed aggregations and lookups
    Timestamp { format: String },
    /// Label taken unmodified from a provider; excluded from serving inputs
    RawLabel,
    /// Label with business logic applied; excluded from serving inputs
    DerivedLabel,
    /// Generated by a model; inputs and datatype derive from the model
    Prediction { model: ModelDescriptor },
}

/// A lookup edge crossing key spaces
///
/// The target entity's keys must be covered by the declaring feature's
/// `input_features`; graph construction rejects the definition otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupSpec {
    /// Entity whose graph is resolved to serve this lookup
    pub entity: String,
    /// Features of that entity to merge into this feature's context
    pub features: Vec<String>,
}

/// An individual feature: the central node of the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDefinition {
    /// Unique name within the namespace
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Entity (key space) this feature belongs to
    pub entity: String,

    /// Variant tag
    #[serde(flatten)]
    pub kind: FeatureKind,

    /// Human-readable datatype output by the business logic
    pub human_datatype: DataType,

    /// Output only: set from the ml_transforms' output datatypes
    #[serde(default)]
    pub model_datatypes: Vec<DataType>,

    /// Ordered input feature names (dependency edges)
    #[serde(default)]
    pub input_features: Vec<String>,

    /// Lookup edges crossing key spaces
    #[serde(default)]
    pub input_lookups: Vec<LookupSpec>,

    /// Ordered business logic, each step passing values to the next
    #[serde(default)]
    pub business_logic: Vec<CodeUnit>,

    /// Ordered ML transformations, applied after business logic
    #[serde(default)]
    pub ml_transforms: Vec<MlTransform>,

    /// Maximum tolerable age of a cached value, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freshness_secs: Option<i64>,

    /// Data-quality checks run by the engine at its two hook points
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_checks: Option<CheckSet>,

    /// key:value tags for indexing and reference
    #[serde(default)]
    pub tags: Vec<(String, String)>,
}

impl FeatureDefinition {
    pub fn new(
        name: impl Into<String>,
        entity: impl Into<String>,
        kind: FeatureKind,
        human_datatype: DataType,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            entity: entity.into(),
            kind,
            human_datatype,
            model_datatypes: Vec::new(),
            input_features: Vec::new(),
            input_lookups: Vec::new(),
            business_logic: Vec::new(),
            ml_transforms: Vec::new(),
            freshness_secs: None,
            data_checks: None,
            tags: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.input_features = inputs;
        self
    }

    pub fn with_lookup(mut self, entity: impl Into<String>, features: Vec<String>) -> Self {
        self.input_lookups.push(LookupSpec {
            entity: entity.into(),
            features,
        });
        self
    }

    pub fn with_logic(mut self, unit: CodeUnit) -> Self {
        self.business_logic.push(unit);
        self
    }

    pub fn with_transform(mut self, transform: MlTransform) -> Self {
        self.ml_transforms.push(transform);
        self
    }

    pub fn with_freshness_secs(mut self, secs: i64) -> Self {
        self.freshness_secs = Some(secs);
        self
    }

    pub fn with_checks(mut self, checks: CheckSet) -> Self {
        self.data_checks = Some(checks);
        self
    }

    /// True for label variants, which never enter model-serving input sets.
    pub fn is_label(&self) -> bool {
        matches!(self.kind, FeatureKind::RawLabel | FeatureKind::DerivedLabel)
    }

    /// True for identity variants that pass through without computation.
    pub fn is_passthrough(&self) -> bool {
        matches!(self.kind, FeatureKind::Key | FeatureKind::Timestamp { .. })
    }

    /// Validate the per-variant field rules.
    pub fn validate(&self) -> Result<(), GraphError> {
        let fail = |reason: &str| {
            Err(GraphError::InvalidDefinition {
                feature: self.name.clone(),
                reason: reason.to_string(),
            })
        };

        if self.name.is_empty() {
            return fail("name cannot be empty");
        }
        if self.entity.is_empty() {
            return fail("entity cannot be empty");
        }
        if self.input_features.contains(&self.name) {
            return fail("feature cannot list itself as an input");
        }

        match &self.kind {
            FeatureKind::Raw | FeatureKind::RawLabel => {
                if !self.business_logic.is_empty() || !self.ml_transforms.is_empty() {
                    return fail("raw features carry no business logic or ml transforms");
                }
                if !self.input_features.is_empty() || !self.input_lookups.is_empty() {
                    return fail("raw features have no inputs");
                }
                if self.freshness_secs.is_some() {
                    return fail("raw feature freshness is inherited from its provider");
                }
            }
            FeatureKind::Key | FeatureKind::Timestamp { .. } => {
                if !self.business_logic.is_empty()
                    || !self.ml_transforms.is_empty()
                    || !self.input_features.is_empty()
                    || !self.input_lookups.is_empty()
                {
                    return fail("key and timestamp features are identity-only");
                }
                if self.freshness_secs.is_some() {
                    return fail("key and timestamp features have no freshness");
                }
                if self.data_checks.is_some() && matches!(self.kind, FeatureKind::Timestamp { .. })
                {
                    return fail("timestamp features carry no data checks");
                }
            }
            FeatureKind::Prediction { model } => {
                if !self.business_logic.is_empty() || !self.ml_transforms.is_empty() {
                    return fail("prediction features are transform-free");
                }
                if !self.input_features.is_empty() {
                    return fail("prediction inputs derive from the model, not declarations");
                }
                if model.input_features.is_empty() {
                    return fail("prediction model declares no input features");
                }
            }
            FeatureKind::Derived | FeatureKind::DerivedLabel => {
                if self.input_features.is_empty() {
                    return fail("derived features require at least one input");
                }
            }
        }

        Ok(())
    }

    /// Dependency edges: declared inputs, or the model's inputs for a
    /// Prediction node.
    pub fn dependencies(&self) -> Vec<&str> {
        match &self.kind {
            FeatureKind::Prediction { model } => {
                model.input_features.iter().map(String::as_str).collect()
            }
            _ => self.input_features.iter().map(String::as_str).collect(),
        }
    }
}
