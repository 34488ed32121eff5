//! The feature graph
//!
//! Construction is two-phase: `FeatureGraphBuilder::add_feature` validates
//! each definition in isolation, and `build` validates the cross-feature
//! invariants (references, lookup key coverage, acyclicity) atomically. A
//! failed build registers nothing, so a cycle never leaves partial state
//! behind.

use crate::error::{GraphError, Result};
use crate::feature::definition::{FeatureDefinition, FeatureKind};
use crate::types::EntitySchema;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Builder collecting entities and feature definitions before validation
#[derive(Debug, Default)]
pub struct FeatureGraphBuilder {
    entities: HashMap<String, EntitySchema>,
    // BTreeMap keeps iteration deterministic during validation
    features: BTreeMap<String, FeatureDefinition>,
}

impl FeatureGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity schema (key space).
    pub fn add_entity(&mut self, schema: EntitySchema) -> &mut Self {
        self.entities.insert(schema.name.clone(), schema);
        self
    }

    /// Add a feature definition, validating its per-variant rules.
    pub fn add_feature(&mut self, def: FeatureDefinition) -> Result<&mut Self> {
        def.validate()?;
        if self.features.contains_key(&def.name) {
            return Err(GraphError::DuplicateFeature(def.name));
        }
        self.features.insert(def.name.clone(), def);
        Ok(self)
    }

    /// Validate cross-feature invariants and produce the immutable graph.
    pub fn build(self) -> Result<FeatureGraph> {
        // Every feature's entity must be registered
        for def in self.features.values() {
            if !self.entities.contains_key(&def.entity) {
                return Err(GraphError::UnknownEntity {
                    feature: def.name.clone(),
                    entity: def.entity.clone(),
                });
            }
        }

        // Every referenced feature must exist
        for def in self.features.values() {
            for dep in def.dependencies() {
                if !self.features.contains_key(dep) {
                    return Err(GraphError::UnknownReference {
                        feature: def.name.clone(),
                        reference: dep.to_string(),
                    });
                }
            }
            for lookup in &def.input_lookups {
                let entity =
                    self.entities
                        .get(&lookup.entity)
                        .ok_or_else(|| GraphError::UnknownEntity {
                            feature: def.name.clone(),
                            entity: lookup.entity.clone(),
                        })?;
                for feature in &lookup.features {
                    if !self.features.contains_key(feature) {
                        return Err(GraphError::UnknownReference {
                            feature: def.name.clone(),
                            reference: feature.clone(),
                        });
                    }
                }
                // Lookup key coverage: the target entity's keys must appear
                // among this feature's input_features
                for key in &entity.keys {
                    if !def.input_features.contains(key) {
                        return Err(GraphError::KeyMismatch {
                            feature: def.name.clone(),
                            entity: lookup.entity.clone(),
                            key: key.clone(),
                        });
                    }
                }
            }
        }

        let depths = compute_depths(&self.features)?;

        // model_datatypes is output-only: the model-readable datatypes a
        // resolved value passes through, in transform order
        let mut features = self.features;
        for def in features.values_mut() {
            def.model_datatypes = match &def.kind {
                FeatureKind::Prediction { model } => vec![model.output_datatype.clone()],
                _ => def
                    .ml_transforms
                    .iter()
                    .map(|t| t.output_datatype().clone())
                    .collect(),
            };
        }

        Ok(FeatureGraph {
            entities: self.entities,
            features,
            depths,
        })
    }
}

/// Immutable, validated feature DAG
#[derive(Debug)]
pub struct FeatureGraph {
    entities: HashMap<String, EntitySchema>,
    features: BTreeMap<String, FeatureDefinition>,
    /// Longest-path depth from raw inputs, used for deterministic ordering
    depths: HashMap<String, usize>,
}

impl FeatureGraph {
    pub fn feature(&self, name: &str) -> Option<&FeatureDefinition> {
        self.features.get(name)
    }

    pub fn entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.get(name)
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    /// Features eligible as model-serving inputs: everything except labels.
    pub fn serving_inputs(&self) -> impl Iterator<Item = &FeatureDefinition> {
        self.features.values().filter(|f| !f.is_label())
    }

    /// Resolve the requested features plus all transitive inputs into
    /// dependency order: by depth, lexicographic by name within a depth.
    pub fn resolve(&self, names: &[&str]) -> Result<Vec<&FeatureDefinition>> {
        let mut needed: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();

        for &name in names {
            let def = self
                .features
                .get(name)
                .ok_or_else(|| GraphError::UnknownReference {
                    feature: "<request>".to_string(),
                    reference: name.to_string(),
                })?;
            if needed.insert(&def.name) {
                stack.push(&def.name);
            }
        }

        while let Some(name) = stack.pop() {
            let def = &self.features[name];
            for dep in def.dependencies() {
                if needed.insert(self.features[dep].name.as_str()) {
                    stack.push(self.features[dep].name.as_str());
                }
            }
        }

        let mut ordered: Vec<&FeatureDefinition> =
            needed.iter().map(|name| &self.features[*name]).collect();
        ordered.sort_by(|a, b| {
            self.depths[&a.name]
                .cmp(&self.depths[&b.name])
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(ordered)
    }
}

/// Longest-path depth per feature; fails with CyclicDependency if the edges
/// do not form a DAG. The reported feature is the lexicographically smallest
/// node on a cycle, keeping the error deterministic.
fn compute_depths(features: &BTreeMap<String, FeatureDefinition>) -> Result<HashMap<String, usize>> {
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for def in features.values() {
        indegree.entry(&def.name).or_insert(0);
        for dep in def.dependencies() {
            *indegree.entry(&def.name).or_insert(0) += 1;
            dependents.entry(dep).or_default().push(&def.name);
        }
    }

    let mut depths: HashMap<String, usize> = HashMap::new();
    // BTreeMap iteration seeds the queue in name order
    let mut ready: Vec<&str> = features
        .keys()
        .filter(|name| indegree[name.as_str()] == 0)
        .map(String::as_str)
        .collect();

    for name in &ready {
        depths.insert(name.to_string(), 0);
    }

    let mut visited = 0;
    while let Some(name) = ready.pop() {
        visited += 1;
        let depth = depths[name];
        if let Some(children) = dependents.get(name) {
            for &child in children {
                let entry = depths.entry(child.to_string()).or_insert(0);
                *entry = (*entry).max(depth + 1);
                let d = indegree.get_mut(child).unwrap();
                *d -= 1;
                if *d == 0 {
                    ready.push(child);
                }
            }
        }
    }

    if visited != features.len() {
        let on_cycle = features
            .keys()
            .find(|name| indegree[name.as_str()] > 0)
            .cloned()
            .unwrap_or_default();
        return Err(GraphError::CyclicDependency(on_cycle));
    }

    Ok(depths)
}
