//! Resolution scheduler
//!
//! Walks the feature graph backward from the requested outputs, consults
//! the freshness tracker at each node, invokes code executors for stale
//! nodes (directly or through the aggregation engine), resolves lookups
//! against other entities' graphs at the same `as_of`, applies ML
//! transformations last, and returns one value per requested feature per
//! row.
//!
//! Training and serving resolution share every line of ordering, execution
//! and aggregation logic; the only difference is how context is
//! materialized (batch range scan vs. point lookup / trailing buffer).

use crate::aggregation::AggregationEngine;
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::datacheck::{CheckOutcome, CheckRunner, CheckStage};
use crate::error::{EngineError, Result};
use crate::executor::CodeRegistry;
use crate::freshness::{Coalesce, FreshnessTracker};
use crate::model::ModelClient;
use crate::provider::{key_fingerprint, DataProvider, KeyTuple, Record};
use crate::scheduler::request::{
    RequestRow, ResolutionMode, ResolutionRequest, ResolutionResponse, ResolutionState, RowError,
    RowResult,
};
use ensemble_core::{
    CodeRef, CodeUnit, FeatureDefinition, FeatureGraph, FeatureKind, GraphError, MlTransform,
    RecordsNeeded, Value, Window,
};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One resolved node's value and computation timestamp
#[derive(Debug, Clone)]
struct Computed {
    value: Value,
    computed_at: i64,
}

/// Accumulated per-row resolution state
#[derive(Debug, Default)]
struct RowState {
    computed: HashMap<String, Computed>,
    warnings: Vec<String>,
    phase: ResolutionState,
}

/// The resolution scheduler
pub struct Resolver {
    graph: Arc<FeatureGraph>,
    registry: Arc<CodeRegistry>,
    tracker: Arc<FreshnessTracker>,
    provider: Arc<dyn DataProvider>,
    models: Option<Arc<dyn ModelClient>>,
    checks: Option<Arc<dyn CheckRunner>>,
    config: EngineConfig,
}

impl Resolver {
    pub fn new(
        graph: Arc<FeatureGraph>,
        registry: Arc<CodeRegistry>,
        provider: Arc<dyn DataProvider>,
        config: EngineConfig,
    ) -> Self {
        let tracker = Arc::new(FreshnessTracker::new(config.namespace.clone()));
        Self {
            graph,
            registry,
            tracker,
            provider,
            models: None,
            checks: None,
            config,
        }
    }

    pub fn with_models(mut self, models: Arc<dyn ModelClient>) -> Self {
        self.models = Some(models);
        self
    }

    pub fn with_checks(mut self, checks: Arc<dyn CheckRunner>) -> Self {
        self.checks = Some(checks);
        self
    }

    /// The tracker owning all cached values for this resolver.
    pub fn tracker(&self) -> &Arc<FreshnessTracker> {
        &self.tracker
    }

    /// Resolve a request. Rows are independent: they run concurrently and
    /// fail independently, so a batch never fails atomically.
    pub async fn resolve(&self, request: ResolutionRequest) -> ResolutionResponse {
        let deadline_ms = request.deadline_ms.unwrap_or(self.config.default_deadline_ms);
        debug!(
            request_id = %request.id,
            rows = request.rows.len(),
            mode = ?request.mode,
            "resolution request"
        );

        let rows = futures::future::join_all(
            request
                .rows
                .iter()
                .map(|row| self.resolve_row(&request.outputs, row, request.mode, deadline_ms)),
        )
        .await;

        ResolutionResponse {
            request_id: request.id,
            rows,
        }
    }

    async fn resolve_row(
        &self,
        outputs: &[String],
        row: &RequestRow,
        mode: ResolutionMode,
        deadline_ms: u64,
    ) -> RowResult {
        let work = self.resolve_set(outputs, &row.key, row.as_of, mode);
        let outcome = if deadline_ms > 0 {
            match tokio::time::timeout(Duration::from_millis(deadline_ms), work).await {
                Ok(result) => result,
                Err(_) => {
                    let feature = outputs.first().cloned().unwrap_or_default();
                    Err(RowError {
                        feature: feature.clone(),
                        error: EngineError::DeadlineExceeded { feature },
                        state: ResolutionState::Executing,
                    })
                }
            }
        } else {
            work.await
        };

        match outcome {
            Ok(state) => {
                let values = outputs
                    .iter()
                    .map(|name| (name.clone(), state.computed[name].value.clone()))
                    .collect();
                RowResult {
                    key: row.key.clone(),
                    as_of: row.as_of,
                    outcome: Ok(values),
                    warnings: state.warnings,
                }
            }
            Err(error) => {
                warn!(feature = %error.feature, error = %error.error, "row resolution failed");
                RowResult {
                    key: row.key.clone(),
                    as_of: row.as_of,
                    outcome: Err(error),
                    warnings: Vec::new(),
                }
            }
        }
    }

    /// Core recursive resolution of a set of features for one key/as_of.
    /// Boxed because lookup resolution recurses into the lookup entity's
    /// own graph through this same entry point.
    fn resolve_set<'a>(
        &'a self,
        outputs: &'a [String],
        key: &'a KeyTuple,
        as_of: i64,
        mode: ResolutionMode,
    ) -> BoxFuture<'a, std::result::Result<RowState, RowError>> {
        Box::pin(async move {
            let mut state = RowState::default();
            self.enter(&mut state, ResolutionState::ResolvingDependencies);

            let names: Vec<&str> = outputs.iter().map(String::as_str).collect();
            let order = match self.graph.resolve(&names) {
                Ok(order) => order,
                Err(GraphError::UnknownReference { reference, .. }) => {
                    return Err(RowError {
                        feature: reference.clone(),
                        error: EngineError::UnknownFeature(reference),
                        state: state.phase,
                    })
                }
                Err(other) => {
                    return Err(RowError {
                        feature: String::new(),
                        error: EngineError::Incomplete {
                            feature: String::new(),
                            reason: other.to_string(),
                        },
                        state: state.phase,
                    })
                }
            };

            // Keys ride along in raw data; the row's entity is the entity
            // of the first requested output
            let row_entity = names
                .first()
                .and_then(|name| self.graph.feature(name))
                .map(|def| def.entity.as_str())
                .unwrap_or_default();

            self.enter(&mut state, ResolutionState::Executing);

            for def in order {
                match self.resolve_node(def, key, as_of, mode, row_entity, &mut state).await {
                    Ok(computed) => {
                        state.computed.insert(def.name.clone(), computed);
                    }
                    Err(error) => {
                        let from = state.phase;
                        self.enter(&mut state, ResolutionState::Failed);
                        return Err(RowError {
                            feature: def.name.clone(),
                            error,
                            state: from,
                        });
                    }
                }
            }

            self.enter(&mut state, ResolutionState::Complete);
            Ok(state)
        })
    }

    /// Resolve one node: serve from cache when fresh, otherwise compute
    /// behind the per-(feature, key, as_of) coalescing gate and commit.
    async fn resolve_node(
        &self,
        def: &FeatureDefinition,
        key: &KeyTuple,
        as_of: i64,
        mode: ResolutionMode,
        row_entity: &str,
        state: &mut RowState,
    ) -> Result<Computed> {
        if def.is_passthrough() {
            let value = self.resolve_passthrough(def, key, as_of, mode, row_entity).await?;
            return Ok(Computed {
                value,
                computed_at: as_of,
            });
        }

        let key_fp = key_fingerprint(key);
        let cadence = self.provider.update_cadence_secs(&def.entity);
        let upstream_latest = def
            .dependencies()
            .iter()
            .filter_map(|dep| state.computed.get(*dep).map(|c| c.computed_at))
            .max();

        if !self
            .tracker
            .needs_recompute(def, cadence, &key_fp, as_of, upstream_latest)
            .await
        {
            if let Some(cached) = self.tracker.latest(&def.name, &key_fp, as_of).await {
                debug!(feature = %def.name, computed_at = cached.computed_at, "serving cached value");
                return Ok(Computed {
                    value: cached.value,
                    computed_at: cached.computed_at,
                });
            }
        }

        let guard = match self.tracker.coalesce(&def.name, &key_fp, as_of) {
            Coalesce::Follower(rx) => {
                debug!(feature = %def.name, "awaiting in-flight computation");
                let value = FreshnessTracker::await_inflight(rx, &def.name).await?;
                return Ok(Computed {
                    value,
                    computed_at: as_of,
                });
            }
            // The guard's drop releases the slot if this future is
            // cancelled before finish
            Coalesce::Leader(guard) => guard,
        };

        let result = self.compute_node(def, key, as_of, mode, row_entity, state).await;
        if let Ok(value) = &result {
            self.tracker.commit(&def.name, &key_fp, value.clone(), as_of).await;
        }
        guard.finish(result.clone());

        result.map(|value| Computed {
            value,
            computed_at: as_of,
        })
    }

    /// Key and Timestamp nodes pass through without computation.
    async fn resolve_passthrough(
        &self,
        def: &FeatureDefinition,
        key: &KeyTuple,
        as_of: i64,
        mode: ResolutionMode,
        row_entity: &str,
    ) -> Result<Value> {
        match &def.kind {
            FeatureKind::Key => {
                if let Some(value) = key.get(&def.name) {
                    return Ok(value.clone());
                }
                // A secondary key carried in the row's raw data
                let record = self.point_in_time_record(row_entity, key, as_of, mode).await?;
                record
                    .and_then(|r| r.field(&def.name).cloned())
                    .ok_or_else(|| EngineError::MissingInput(def.name.clone()))
            }
            FeatureKind::Timestamp { .. } => {
                let record = self.point_in_time_record(row_entity, key, as_of, mode).await?;
                Ok(Value::Int(record.map(|r| r.timestamp).unwrap_or(as_of)))
            }
            _ => unreachable!("resolve_passthrough called for a computed feature"),
        }
    }

    async fn compute_node(
        &self,
        def: &FeatureDefinition,
        key: &KeyTuple,
        as_of: i64,
        mode: ResolutionMode,
        row_entity: &str,
        state: &mut RowState,
    ) -> Result<Value> {
        match &def.kind {
            FeatureKind::Raw | FeatureKind::RawLabel => {
                self.compute_raw(def, key, as_of, mode, state).await
            }
            FeatureKind::Derived | FeatureKind::DerivedLabel => {
                self.compute_derived(def, key, as_of, mode, row_entity, state).await
            }
            FeatureKind::Prediction { model } => {
                let client = self.models.as_ref().ok_or_else(|| EngineError::Model {
                    model: model.name.clone(),
                    reason: "no model client configured".to_string(),
                })?;
                let mut inputs = HashMap::new();
                for name in &model.input_features {
                    let computed =
                        state
                            .computed
                            .get(name)
                            .ok_or_else(|| EngineError::MissingInput(name.clone()))?;
                    inputs.insert(name.clone(), computed.value.clone());
                }
                let out = client.invoke(&model.name, &inputs).await?;
                let value = out
                    .get("prediction")
                    .cloned()
                    .or_else(|| (out.len() == 1).then(|| out.values().next().cloned()).flatten())
                    .ok_or_else(|| EngineError::Model {
                        model: model.name.clone(),
                        reason: "model returned no prediction output".to_string(),
                    })?;
                if !model.output_datatype.accepts(&value) {
                    return Err(EngineError::TypeMismatch {
                        feature: def.name.clone(),
                        declared: format!("{:?}", model.output_datatype),
                        got: value.type_name().to_string(),
                    });
                }
                Ok(value)
            }
            FeatureKind::Key | FeatureKind::Timestamp { .. } => {
                unreachable!("passthrough features are not computed")
            }
        }
    }

    async fn compute_raw(
        &self,
        def: &FeatureDefinition,
        key: &KeyTuple,
        as_of: i64,
        mode: ResolutionMode,
        state: &mut RowState,
    ) -> Result<Value> {
        let record = self
            .point_in_time_record(&def.entity, key, as_of, mode)
            .await?
            .ok_or_else(|| EngineError::Incomplete {
                feature: def.name.clone(),
                reason: format!("no '{}' record at or before as_of {as_of}", def.entity),
            })?;

        if let Some(checks) = &def.data_checks {
            self.run_checks(
                &def.name,
                CheckStage::RawInputs,
                &checks.raw_inputs,
                &record.values,
                &mut state.warnings,
            )
            .await?;
        }

        let value = record
            .field(&def.name)
            .cloned()
            .ok_or_else(|| EngineError::Incomplete {
                feature: def.name.clone(),
                reason: "field absent from provider record".to_string(),
            })?;

        if !def.human_datatype.accepts(&value) {
            return Err(EngineError::TypeMismatch {
                feature: def.name.clone(),
                declared: format!("{:?}", def.human_datatype),
                got: value.type_name().to_string(),
            });
        }
        Ok(value)
    }

    async fn compute_derived(
        &self,
        def: &FeatureDefinition,
        key: &KeyTuple,
        as_of: i64,
        mode: ResolutionMode,
        _row_entity: &str,
        state: &mut RowState,
    ) -> Result<Value> {
        let mut ctx = ExecutionContext::new(key.clone(), as_of);
        for dep in &def.input_features {
            let computed = state
                .computed
                .get(dep)
                .ok_or_else(|| EngineError::MissingInput(dep.clone()))?;
            ctx.insert(dep.clone(), computed.value.clone());
        }

        if let Some(checks) = &def.data_checks {
            self.run_checks(
                &def.name,
                CheckStage::RawInputs,
                &checks.raw_inputs,
                &ctx.row,
                &mut state.warnings,
            )
            .await?;
        }

        if !def.input_lookups.is_empty() {
            self.enter(state, ResolutionState::Joining);
            self.resolve_lookups(def, &mut ctx, as_of, mode, state).await?;
            self.enter(state, ResolutionState::Executing);
        }

        for unit in &def.business_logic {
            match unit {
                CodeUnit::Aggregate(spec) => {
                    let records = self
                        .window_records(&def.entity, key, as_of, mode, &spec.window)
                        .await?;
                    let value = AggregationEngine::apply(
                        &def.name,
                        spec,
                        &records,
                        key,
                        as_of,
                        &self.registry,
                    )
                    .await?;
                    ctx.insert(def.name.clone(), value);
                }
                CodeUnit::Function {
                    code,
                    records_needed,
                    idempotent,
                } => {
                    match records_needed {
                        RecordsNeeded::SingleRecord | RecordsNeeded::Join => {}
                        RecordsNeeded::Aggregation => {
                            ctx.window =
                                self.history_records(&def.entity, key, as_of).await?;
                        }
                        RecordsNeeded::AllRecords => {
                            ctx.table =
                                self.history_records(&def.entity, key, as_of).await?;
                        }
                    }
                    let out = self.run_function(code, *idempotent, &ctx).await?;
                    for (field, value) in out {
                        ctx.insert(field, value);
                    }
                }
            }
        }

        if let Some(checks) = &def.data_checks {
            self.run_checks(
                &def.name,
                CheckStage::PostBusinessLogic,
                &checks.post_business_logic,
                &ctx.row,
                &mut state.warnings,
            )
            .await?;
        }

        let mut value = match ctx.row.get(&def.name) {
            Some(value) => value.clone(),
            // No business logic: the feature is its single input, unchanged
            None if def.business_logic.is_empty() && def.input_features.len() == 1 => {
                ctx.row[&def.input_features[0]].clone()
            }
            None => {
                return Err(EngineError::Incomplete {
                    feature: def.name.clone(),
                    reason: "business logic produced no value for this feature".to_string(),
                })
            }
        };

        if !def.human_datatype.accepts(&value) {
            return Err(EngineError::TypeMismatch {
                feature: def.name.clone(),
                declared: format!("{:?}", def.human_datatype),
                got: value.type_name().to_string(),
            });
        }

        if !def.ml_transforms.is_empty() {
            self.enter(state, ResolutionState::Transforming);
            let mut current = def.human_datatype.clone();
            for transform in &def.ml_transforms {
                if transform.input_datatype() != &current {
                    return Err(EngineError::TransformationTypeMismatch {
                        feature: def.name.clone(),
                        expected: format!("{:?}", transform.input_datatype()),
                        found: format!("{current:?}"),
                    });
                }
                value = self.apply_transform(def, transform, value, key, as_of).await?;
                current = transform.output_datatype().clone();
                if !current.accepts(&value) {
                    return Err(EngineError::TypeMismatch {
                        feature: def.name.clone(),
                        declared: format!("{current:?}"),
                        got: value.type_name().to_string(),
                    });
                }
            }
            self.enter(state, ResolutionState::Executing);
        }

        Ok(value)
    }

    /// Resolve lookup entities' features recursively at the same as_of and
    /// merge the joined rows into the context.
    async fn resolve_lookups(
        &self,
        def: &FeatureDefinition,
        ctx: &mut ExecutionContext,
        as_of: i64,
        mode: ResolutionMode,
        state: &mut RowState,
    ) -> Result<()> {
        for lookup in &def.input_lookups {
            let entity = self.graph.entity(&lookup.entity).ok_or_else(|| {
                EngineError::Incomplete {
                    feature: def.name.clone(),
                    reason: format!("unknown lookup entity '{}'", lookup.entity),
                }
            })?;

            // Lookup keys come from already-computed input features
            let mut sub_key = KeyTuple::new();
            for field in &entity.keys {
                let value = ctx
                    .row
                    .get(field)
                    .cloned()
                    .ok_or_else(|| EngineError::MissingInput(field.clone()))?;
                sub_key.insert(field.clone(), value);
            }

            debug!(feature = %def.name, entity = %lookup.entity, "resolving lookup");
            let sub_state = self
                .resolve_set(&lookup.features, &sub_key, as_of, mode)
                .await
                .map_err(|err| err.error)?;

            let mut row = HashMap::new();
            for feature in &lookup.features {
                row.insert(feature.clone(), sub_state.computed[feature].value.clone());
            }
            ctx.lookups.insert(lookup.entity.clone(), row);
            state.warnings.extend(sub_state.warnings);
        }
        Ok(())
    }

    async fn apply_transform(
        &self,
        def: &FeatureDefinition,
        transform: &MlTransform,
        value: Value,
        key: &KeyTuple,
        as_of: i64,
    ) -> Result<Value> {
        match transform {
            MlTransform::Custom { code, .. } => {
                let mut ctx = ExecutionContext::new(key.clone(), as_of);
                ctx.insert(def.name.clone(), value);
                let out = self.run_function(code, true, &ctx).await?;
                out.get(&def.name)
                    .or_else(|| (out.len() == 1).then(|| out.values().next()).flatten())
                    .cloned()
                    .ok_or_else(|| EngineError::ExecutionFailure {
                        code: code.to_string(),
                        reason: format!("transform returned no value for '{}'", def.name),
                    })
            }
            MlTransform::ModelEncoder { model, .. } => {
                let client = self.models.as_ref().ok_or_else(|| EngineError::Model {
                    model: model.clone(),
                    reason: "no model client configured".to_string(),
                })?;
                let mut inputs = HashMap::new();
                inputs.insert(def.name.clone(), value);
                let out = client.invoke(model, &inputs).await?;
                out.get("prediction")
                    .cloned()
                    .or_else(|| (out.len() == 1).then(|| out.values().next().cloned()).flatten())
                    .ok_or_else(|| EngineError::Model {
                        model: model.clone(),
                        reason: "encoder returned no output".to_string(),
                    })
            }
        }
    }

    /// Run a registered function, retrying ExecutionFailure for idempotent
    /// units up to the configured bound.
    async fn run_function(
        &self,
        code: &CodeRef,
        idempotent: bool,
        ctx: &ExecutionContext,
    ) -> Result<HashMap<String, Value>> {
        let executor = self.registry.get(code)?;
        let retryable = idempotent || executor.idempotent();
        let mut attempt = 0;
        loop {
            match executor.execute(ctx).await {
                Ok(out) => return Ok(out),
                Err(err @ EngineError::ExecutionFailure { .. })
                    if retryable && attempt < self.config.max_retries =>
                {
                    attempt += 1;
                    warn!(code = %code, attempt, error = %err, "retrying idempotent unit");
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_checks(
        &self,
        feature: &str,
        stage: CheckStage,
        names: &[String],
        values: &HashMap<String, Value>,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        let Some(runner) = &self.checks else {
            return Ok(());
        };
        for check in names {
            match runner.run(check, stage, feature, values).await {
                CheckOutcome::Passed => {}
                CheckOutcome::Failed { reason } => {
                    if self.config.blocking_data_checks {
                        return Err(EngineError::CheckFailed {
                            feature: feature.to_string(),
                            check: check.clone(),
                            reason,
                        });
                    }
                    warn!(%feature, %check, %stage, %reason, "data check failed");
                    warnings.push(format!(
                        "check '{check}' failed at {stage} for '{feature}': {reason}"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Most recent record for this key at or before as_of.
    async fn point_in_time_record(
        &self,
        entity: &str,
        key: &KeyTuple,
        as_of: i64,
        mode: ResolutionMode,
    ) -> Result<Option<Record>> {
        match mode {
            ResolutionMode::Serving => self.provider.fetch_latest(entity, key, as_of).await,
            ResolutionMode::Training => {
                let mut records = self
                    .provider
                    .fetch_records(entity, key, (i64::MIN, as_of.saturating_add(1)))
                    .await?;
                Ok(records.pop())
            }
        }
    }

    /// Records backing a declared aggregation window.
    async fn window_records(
        &self,
        entity: &str,
        key: &KeyTuple,
        as_of: i64,
        mode: ResolutionMode,
        window: &Window,
    ) -> Result<Vec<Record>> {
        match (mode, window) {
            // Time windows fetch exactly the half-open span in both modes
            (_, Window::Time { secs }) => {
                self.provider.fetch_records(entity, key, (as_of - secs, as_of)).await
            }
            (ResolutionMode::Training, Window::LastN { .. }) => {
                self.provider
                    .fetch_records(entity, key, (i64::MIN, as_of.saturating_add(1)))
                    .await
            }
            (ResolutionMode::Serving, Window::LastN { n }) => {
                let start = as_of - self.config.serving_lookback_secs;
                let records = self
                    .provider
                    .fetch_records(entity, key, (start, as_of.saturating_add(1)))
                    .await?;
                if records.len() < *n {
                    // Buffer too short for the window: correctness over
                    // latency, scan the full history
                    return self
                        .provider
                        .fetch_records(entity, key, (i64::MIN, as_of.saturating_add(1)))
                        .await;
                }
                Ok(records)
            }
        }
    }

    /// Full per-key history, for Aggregation/AllRecords function units.
    async fn history_records(
        &self,
        entity: &str,
        key: &KeyTuple,
        as_of: i64,
    ) -> Result<Vec<Record>> {
        self.provider
            .fetch_records(entity, key, (i64::MIN, as_of.saturating_add(1)))
            .await
    }

    fn enter(&self, state: &mut RowState, to: ResolutionState) {
        debug!(from = ?state.phase, ?to, "resolution state");
        state.phase = to;
    }
}
