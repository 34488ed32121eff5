//! Scheduler test fixtures: a small two-entity graph with raw, aggregated,
//! row-function, lookup and prediction features, backed by a seeded
//! in-memory provider.


use crate::config::EngineConfig;
use crate::executor::{CodeRegistry, RowFunction};
use crate::provider::{DataProvider, KeyTuple, MemoryProvider};
use crate::scheduler::Resolver;
use ensemble_core::{
    AggregateFunction, AggregationSpec, CodeRef, CodeUnit, DataType, EntitySchema,
    FeatureDefinition, FeatureGraph, FeatureGraphBuilder, FeatureKind, RecordsNeeded, Value,
    Window,
};
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) fn user_key(id: &str) -> KeyTuple {
    let mut key = KeyTuple::new();
    key.insert("user_id".to_string(), Value::Text(id.to_string()));
    key
}

pub(crate) fn merchant_key(id: &str) -> KeyTuple {
    let mut key = KeyTuple::new();
    key.insert("merchant_id".to_string(), Value::Text(id.to_string()));
    key
}

/// users: amount events with a 15s spend sum, a last-3 average, a doubled
/// risk score and a join onto merchants' rating.
pub(crate) fn fixture_graph() -> FeatureGraph {
    let mut builder = FeatureGraphBuilder::new();
    builder.add_entity(EntitySchema::new(
        "users",
        vec!["user_id".into()],
        "event_time",
    ));
    builder.add_entity(EntitySchema::new(
        "merchants",
        vec!["merchant_id".into()],
        "updated_at",
    ));

    builder
        .add_feature(FeatureDefinition::new(
            "user_id",
            "users",
            FeatureKind::Key,
            DataType::Text,
        ))
        .unwrap();
    builder
        .add_feature(FeatureDefinition::new(
            "event_time",
            "users",
            FeatureKind::Timestamp {
                format: "epoch_seconds".into(),
            },
            DataType::Timestamp,
        ))
        .unwrap();
    builder
        .add_feature(FeatureDefinition::new(
            "amount",
            "users",
            FeatureKind::Raw,
            DataType::Int64,
        ))
        .unwrap();
    builder
        .add_feature(FeatureDefinition::new(
            "merchant_id",
            "users",
            FeatureKind::Raw,
            DataType::Text,
        ))
        .unwrap();
    builder
        .add_feature(FeatureDefinition::new(
            "merchant_rating",
            "merchants",
            FeatureKind::Raw,
            DataType::Int64,
        ))
        .unwrap();

    builder
        .add_feature(
            FeatureDefinition::new("spend_15s", "users", FeatureKind::Derived, DataType::Int64)
                .with_inputs(vec!["user_id".into(), "amount".into()])
                .with_logic(CodeUnit::Aggregate(AggregationSpec::new(
                    AggregateFunction::Sum,
                    "amount",
                    vec!["user_id".into()],
                    Window::Time { secs: 15 },
                ))),
        )
        .unwrap();

    builder
        .add_feature(
            FeatureDefinition::new("avg_last_3", "users", FeatureKind::Derived, DataType::Float64)
                .with_inputs(vec!["user_id".into(), "amount".into()])
                .with_logic(CodeUnit::Aggregate(AggregationSpec::new(
                    AggregateFunction::Avg,
                    "amount",
                    vec!["user_id".into()],
                    Window::LastN { n: 3 },
                ))),
        )
        .unwrap();

    builder
        .add_feature(
            FeatureDefinition::new("risk", "users", FeatureKind::Derived, DataType::Float64)
                .with_inputs(vec!["amount".into()])
                .with_logic(CodeUnit::Function {
                    code: CodeRef::new("risk_score", "1.0"),
                    records_needed: RecordsNeeded::SingleRecord,
                    idempotent: true,
                }),
        )
        .unwrap();

    builder
        .add_feature(
            FeatureDefinition::new("merchant_risk", "users", FeatureKind::Derived, DataType::Int64)
                .with_inputs(vec!["merchant_id".into()])
                .with_lookup("merchants", vec!["merchant_rating".into()])
                .with_logic(CodeUnit::Function {
                    code: CodeRef::new("merchant_rating_join", "1.0"),
                    records_needed: RecordsNeeded::Join,
                    idempotent: true,
                }),
        )
        .unwrap();

    builder.build().unwrap()
}

pub(crate) fn fixture_registry() -> CodeRegistry {
    let mut registry = CodeRegistry::new();
    registry.register(
        CodeRef::new("risk_score", "1.0"),
        Arc::new(RowFunction::new(|ctx: &crate::context::ExecutionContext| {
            let amount = ctx.require_f64("amount")?;
            let mut out = HashMap::new();
            out.insert("risk".to_string(), Value::Float(amount * 2.0));
            Ok(out)
        })),
    );
    registry.register(
        CodeRef::new("merchant_rating_join", "1.0"),
        Arc::new(RowFunction::new(|ctx: &crate::context::ExecutionContext| {
            let rating = ctx.require_lookup("merchants", "merchant_rating")?;
            let mut out = HashMap::new();
            out.insert("merchant_risk".to_string(), rating.clone());
            Ok(out)
        })),
    );
    registry
}

/// Push one user event carrying its own key fields, per the convention that
/// keys ride along in raw data.
pub(crate) async fn push_event(provider: &MemoryProvider, user: &str, ts: i64, amount: i64) {
    let mut values = HashMap::new();
    values.insert("user_id".to_string(), Value::Text(user.to_string()));
    values.insert("amount".to_string(), Value::Int(amount));
    values.insert("merchant_id".to_string(), Value::Text("m1".to_string()));
    provider.push("users", &user_key(user), ts, values).await;
}

pub(crate) async fn push_merchant(provider: &MemoryProvider, merchant: &str, ts: i64, rating: i64) {
    let mut values = HashMap::new();
    values.insert("merchant_id".to_string(), Value::Text(merchant.to_string()));
    values.insert("merchant_rating".to_string(), Value::Int(rating));
    provider
        .push("merchants", &merchant_key(merchant), ts, values)
        .await;
}

pub(crate) fn fixture_resolver(provider: Arc<dyn DataProvider>, config: EngineConfig) -> Resolver {
    Resolver::new(
        Arc::new(fixture_graph()),
        Arc::new(fixture_registry()),
        provider,
        config,
    )
}
