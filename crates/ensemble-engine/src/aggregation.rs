//! Aggregation engine
//!
//! Materializes the window an aggregation needs and applies the aggregate
//! function deterministically. The same selection and function semantics
//! run over a historical batch (training) and a live trailing buffer
//! (serving); for equal `as_of` and group key the output is identical —
//! the central correctness property of the engine.

use crate::error::{EngineError, Result};
use crate::executor::CodeRegistry;
use crate::provider::{KeyTuple, Record};
use ensemble_core::{
    AggregateFunction, AggregationSpec, EmptyWindowPolicy, SortDirection, Value, Window,
};
use std::cmp::Ordering;

/// Stateless window selection and aggregate application
pub struct AggregationEngine;

impl AggregationEngine {
    /// Select the records the spec's window covers at `as_of`.
    ///
    /// Time windows are half-open `[as_of - w, as_of)` so a record on the
    /// exact boundary is never counted twice across successive evaluations.
    /// Count windows take the N most recent by the declared ordering
    /// (default: record timestamp descending); exactly equal order keys
    /// break ties by insertion sequence, never non-deterministically.
    pub fn select_window<'a>(
        spec: &AggregationSpec,
        records: &'a [Record],
        key: &KeyTuple,
        as_of: i64,
    ) -> Vec<&'a Record> {
        let grouped = records
            .iter()
            .filter(|r| Self::matches_group(spec, r, key));

        match spec.window {
            Window::Time { secs } => {
                let start = as_of - secs;
                let mut selected: Vec<&Record> = grouped
                    .filter(|r| r.timestamp >= start && r.timestamp < as_of)
                    .collect();
                selected.sort_by_key(|r| (r.timestamp, r.seq));
                selected
            }
            Window::LastN { n } => {
                let mut candidates: Vec<&Record> =
                    grouped.filter(|r| r.timestamp <= as_of).collect();
                candidates.sort_by(|a, b| Self::order_records(spec, a, b));
                candidates.truncate(n);
                // Hand the window over in chronological order
                candidates.sort_by_key(|r| (r.timestamp, r.seq));
                candidates
            }
        }
    }

    /// Apply the aggregate function over the selected window.
    pub async fn apply(
        feature: &str,
        spec: &AggregationSpec,
        records: &[Record],
        key: &KeyTuple,
        as_of: i64,
        registry: &CodeRegistry,
    ) -> Result<Value> {
        let window = Self::select_window(spec, records, key, as_of);

        if window.is_empty() {
            return match &spec.on_empty {
                EmptyWindowPolicy::Default(value) => Ok(value.clone()),
                EmptyWindowPolicy::Fail => Err(EngineError::EmptyWindow {
                    feature: feature.to_string(),
                    as_of,
                }),
            };
        }

        match &spec.function {
            AggregateFunction::Count => {
                let count = window
                    .iter()
                    .filter(|r| matches!(r.field(&spec.target), Some(v) if !v.is_null()))
                    .count();
                Ok(Value::Int(count as i64))
            }
            AggregateFunction::Sum => {
                let values = Self::numeric_values(feature, &window, &spec.target)?;
                let all_int = window.iter().all(|r| {
                    matches!(r.field(&spec.target), Some(Value::Int(_)) | Some(Value::Null) | None)
                });
                let sum: f64 = values.iter().sum();
                if all_int {
                    Ok(Value::Int(sum as i64))
                } else {
                    Ok(Value::Float(sum))
                }
            }
            AggregateFunction::Avg => {
                let values = Self::numeric_values(feature, &window, &spec.target)?;
                if values.is_empty() {
                    return match &spec.on_empty {
                        EmptyWindowPolicy::Default(value) => Ok(value.clone()),
                        EmptyWindowPolicy::Fail => Err(EngineError::EmptyWindow {
                            feature: feature.to_string(),
                            as_of,
                        }),
                    };
                }
                Ok(Value::Float(values.iter().sum::<f64>() / values.len() as f64))
            }
            AggregateFunction::Max => Self::extreme(feature, spec, &window, as_of, Ordering::Greater),
            AggregateFunction::Min => Self::extreme(feature, spec, &window, as_of, Ordering::Less),
            AggregateFunction::Custom(code) => {
                let executor = registry.get(code)?;
                let mut ctx = crate::context::ExecutionContext::new(key.clone(), as_of);
                ctx.window = window.into_iter().cloned().collect();
                let out = executor.execute(&ctx).await?;
                out.get(feature)
                    .or_else(|| (out.len() == 1).then(|| out.values().next()).flatten())
                    .cloned()
                    .ok_or_else(|| EngineError::ExecutionFailure {
                        code: code.to_string(),
                        reason: format!("custom aggregate returned no value for '{feature}'"),
                    })
            }
        }
    }

    /// Group membership: every group-by field present in the key tuple must
    /// match the record's value for that field.
    fn matches_group(spec: &AggregationSpec, record: &Record, key: &KeyTuple) -> bool {
        spec.group_by.iter().all(|field| match key.get(field) {
            Some(expected) => record.field(field) == Some(expected),
            None => true,
        })
    }

    /// Count-window ordering: declared order_by fields (or timestamp
    /// descending), most-recent first, seq as the stable tie-break.
    fn order_records(spec: &AggregationSpec, a: &Record, b: &Record) -> Ordering {
        if let Some(order_by) = &spec.order_by {
            for field in &order_by.fields {
                let cmp = Self::compare_field(a.field(field), b.field(field));
                let cmp = match order_by.direction {
                    SortDirection::Asc => cmp,
                    SortDirection::Desc => cmp.reverse(),
                };
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
            // Stable on exactly equal order keys: later insertion wins first
            b.seq.cmp(&a.seq)
        } else {
            (b.timestamp, b.seq).cmp(&(a.timestamp, a.seq))
        }
    }

    /// Structural comparison for order-by fields, so text and boolean
    /// keys are honored rather than silently degrading to insertion order.
    /// Absent fields and nulls sort below every present value.
    fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
        let a = a.filter(|v| !v.is_null());
        let b = b.filter(|v| !v.is_null());
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(Value::Text(x)), Some(Value::Text(y))) => x.cmp(y),
            (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
            (Some(x), Some(y)) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            },
        }
    }

    fn numeric_values(feature: &str, window: &[&Record], target: &str) -> Result<Vec<f64>> {
        let mut values = Vec::with_capacity(window.len());
        for record in window {
            match record.field(target) {
                Some(Value::Null) | None => continue,
                Some(value) => match value.as_f64() {
                    Some(f) => values.push(f),
                    None => {
                        return Err(EngineError::TypeMismatch {
                            feature: feature.to_string(),
                            declared: "numeric".to_string(),
                            got: value.type_name().to_string(),
                        })
                    }
                },
            }
        }
        Ok(values)
    }

    fn extreme(
        feature: &str,
        spec: &AggregationSpec,
        window: &[&Record],
        as_of: i64,
        direction: Ordering,
    ) -> Result<Value> {
        let mut best: Option<&Value> = None;
        let mut best_f = f64::NAN;
        for record in window {
            let value = match record.field(&spec.target) {
                Some(Value::Null) | None => continue,
                Some(v) => v,
            };
            let f = value.as_f64().ok_or_else(|| EngineError::TypeMismatch {
                feature: feature.to_string(),
                declared: "numeric".to_string(),
                got: value.type_name().to_string(),
            })?;
            let take = match best {
                None => true,
                Some(_) => f.partial_cmp(&best_f) == Some(direction),
            };
            if take {
                best = Some(value);
                best_f = f;
            }
        }
        match best {
            Some(value) => Ok(value.clone()),
            None => match &spec.on_empty {
                EmptyWindowPolicy::Default(value) => Ok(value.clone()),
                EmptyWindowPolicy::Fail => Err(EngineError::EmptyWindow {
                    feature: feature.to_string(),
                    as_of,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(ts: i64, seq: u64, amount: i64) -> Record {
        let mut values = HashMap::new();
        values.insert("amount".to_string(), Value::Int(amount));
        values.insert("user_id".to_string(), Value::Text("u1".into()));
        Record {
            timestamp: ts,
            seq,
            values,
        }
    }

    fn fixture() -> Vec<Record> {
        // Timestamps [10,20,30,40,50]; amount mirrors the timestamp
        vec![
            record(10, 0, 10),
            record(20, 1, 20),
            record(30, 2, 30),
            record(40, 3, 40),
            record(50, 4, 50),
        ]
    }

    fn u1_key() -> KeyTuple {
        let mut key = KeyTuple::new();
        key.insert("user_id".to_string(), Value::Text("u1".into()));
        key
    }

    #[tokio::test]
    async fn test_count_window_takes_three_most_recent() {
        let spec = AggregationSpec::new(
            AggregateFunction::Avg,
            "amount",
            vec!["user_id".into()],
            Window::LastN { n: 3 },
        );
        let registry = CodeRegistry::new();

        // Shuffled input ordering must not change the answer
        let mut records = fixture();
        records.swap(0, 4);
        records.swap(1, 3);

        let out = AggregationEngine::apply("avg3", &spec, &records, &u1_key(), 50, &registry)
            .await
            .unwrap();
        assert_eq!(out, Value::Float(40.0)); // {30,40,50}
    }

    #[tokio::test]
    async fn test_time_window_is_half_open() {
        let spec = AggregationSpec::new(
            AggregateFunction::Sum,
            "amount",
            vec!["user_id".into()],
            Window::Time { secs: 15 },
        );
        let registry = CodeRegistry::new();

        // [30, 45): includes 30 and 40, excludes 45-boundary and 50
        let out = AggregationEngine::apply("sum15", &spec, &fixture(), &u1_key(), 45, &registry)
            .await
            .unwrap();
        assert_eq!(out, Value::Int(70));
    }

    #[tokio::test]
    async fn test_count_window_tie_break_by_insertion() {
        let spec = AggregationSpec::new(
            AggregateFunction::Sum,
            "amount",
            vec![],
            Window::LastN { n: 1 },
        );
        let registry = CodeRegistry::new();

        // Equal timestamps: the later-inserted record wins the window slot
        let records = vec![record(10, 0, 100), record(10, 1, 200)];
        let out = AggregationEngine::apply("last", &spec, &records, &KeyTuple::new(), 50, &registry)
            .await
            .unwrap();
        assert_eq!(out, Value::Int(200));
    }

    #[tokio::test]
    async fn test_order_by_text_field() {
        let registry = CodeRegistry::new();
        let spec = AggregationSpec::new(
            AggregateFunction::Sum,
            "amount",
            vec![],
            Window::LastN { n: 1 },
        )
        .with_order_by(vec!["batch".into()], SortDirection::Desc);

        // Lexicographically greatest batch wins, not the latest insertion
        let mut records = vec![record(10, 0, 100), record(20, 1, 200), record(30, 2, 300)];
        records[0].values.insert("batch".to_string(), Value::Text("b".into()));
        records[1].values.insert("batch".to_string(), Value::Text("c".into()));
        records[2].values.insert("batch".to_string(), Value::Text("a".into()));

        let out = AggregationEngine::apply("latest_batch", &spec, &records, &KeyTuple::new(), 50, &registry)
            .await
            .unwrap();
        assert_eq!(out, Value::Int(200));
    }

    #[tokio::test]
    async fn test_empty_window_policies() {
        let registry = CodeRegistry::new();

        let sum = AggregationSpec::new(
            AggregateFunction::Sum,
            "amount",
            vec![],
            Window::Time { secs: 5 },
        );
        let out = AggregationEngine::apply("sum", &sum, &[], &KeyTuple::new(), 100, &registry)
            .await
            .unwrap();
        assert_eq!(out, Value::Int(0));

        let avg = AggregationSpec::new(
            AggregateFunction::Avg,
            "amount",
            vec![],
            Window::Time { secs: 5 },
        );
        let err = AggregationEngine::apply("avg", &avg, &[], &KeyTuple::new(), 100, &registry)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmptyWindow { .. }));

        let avg = avg.with_default(Value::Float(-1.0));
        let out = AggregationEngine::apply("avg", &avg, &[], &KeyTuple::new(), 100, &registry)
            .await
            .unwrap();
        assert_eq!(out, Value::Float(-1.0));
    }

    #[tokio::test]
    async fn test_min_max_keep_original_value() {
        let registry = CodeRegistry::new();
        let max = AggregationSpec::new(
            AggregateFunction::Max,
            "amount",
            vec![],
            Window::Time { secs: 100 },
        );
        let out = AggregationEngine::apply("max", &max, &fixture(), &KeyTuple::new(), 60, &registry)
            .await
            .unwrap();
        assert_eq!(out, Value::Int(50));

        let min = AggregationSpec::new(
            AggregateFunction::Min,
            "amount",
            vec![],
            Window::Time { secs: 100 },
        );
        let out = AggregationEngine::apply("min", &min, &fixture(), &KeyTuple::new(), 60, &registry)
            .await
            .unwrap();
        assert_eq!(out, Value::Int(10));
    }

    #[tokio::test]
    async fn test_group_by_filters_other_keys() {
        let registry = CodeRegistry::new();
        let spec = AggregationSpec::new(
            AggregateFunction::Count,
            "amount",
            vec!["user_id".into()],
            Window::Time { secs: 100 },
        );

        let mut records = fixture();
        let mut other = record(25, 9, 999);
        other
            .values
            .insert("user_id".to_string(), Value::Text("u2".into()));
        records.push(other);

        let out = AggregationEngine::apply("count", &spec, &records, &u1_key(), 60, &registry)
            .await
            .unwrap();
        assert_eq!(out, Value::Int(5));
    }

    #[tokio::test]
    async fn test_custom_delegates_with_window() {
        use crate::executor::RowFunction;
        use ensemble_core::CodeRef;
        use std::sync::Arc;

        let mut registry = CodeRegistry::new();
        registry.register(
            CodeRef::new("spread", "1.0"),
            Arc::new(RowFunction::new(|ctx: &crate::context::ExecutionContext| {
                let mut lo = f64::INFINITY;
                let mut hi = f64::NEG_INFINITY;
                for r in &ctx.window {
                    if let Some(f) = r.field("amount").and_then(Value::as_f64) {
                        lo = lo.min(f);
                        hi = hi.max(f);
                    }
                }
                let mut out = HashMap::new();
                out.insert("spread".to_string(), Value::Float(hi - lo));
                Ok(out)
            })),
        );

        let spec = AggregationSpec::new(
            AggregateFunction::Custom(CodeRef::new("spread", "1.0")),
            "amount",
            vec![],
            Window::LastN { n: 3 },
        )
        .with_default(Value::Float(0.0));

        let out = AggregationEngine::apply("spread", &spec, &fixture(), &KeyTuple::new(), 50, &registry)
            .await
            .unwrap();
        assert_eq!(out, Value::Float(20.0)); // {30,40,50}
    }
}
