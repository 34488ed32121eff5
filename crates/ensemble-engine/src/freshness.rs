//! Freshness tracking and the cached-value store
//!
//! The tracker owns every cached value record in the engine. Executors never
//! mutate it directly: they return new values and the scheduler commits
//! them. Records are superseded, never edited in place, so a reader at any
//! `as_of` sees a consistent history.

use crate::error::{EngineError, Result};
use ensemble_core::{FeatureDefinition, FeatureKind, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::debug;

/// One committed computation: (value, when it was computed)
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Value,
    pub computed_at: i64,
}

type SlotKey = (String, String); // (feature, key fingerprint)
type InflightKey = (String, String, i64); // (feature, key fingerprint, as_of)
type InflightResult = Option<std::result::Result<Value, EngineError>>;
type InflightMap = Arc<StdMutex<HashMap<InflightKey, watch::Receiver<InflightResult>>>>;

fn lock_inflight(map: &InflightMap) -> std::sync::MutexGuard<'_, HashMap<InflightKey, watch::Receiver<InflightResult>>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Outcome of registering interest in a (feature, key, as_of) computation
pub enum Coalesce {
    /// This caller computes; the guard publishes via `finish`, and its drop
    /// releases the slot even if the computation is cancelled mid-flight
    Leader(InflightGuard),
    /// Another caller is already computing; await its result
    Follower(watch::Receiver<InflightResult>),
}

/// The leader's claim on a (feature, key, as_of) computation.
///
/// Dropping the guard without `finish` (a panic, or a deadline cancelling
/// the future) removes the in-flight entry and closes the channel, so
/// waiting followers error out and the next caller becomes a fresh leader
/// instead of waiting on a computation that will never publish.
pub struct InflightGuard {
    inflight: InflightMap,
    key: InflightKey,
    tx: Option<watch::Sender<InflightResult>>,
}

impl InflightGuard {
    /// Publish the leader's result and release the slot.
    pub fn finish(mut self, result: std::result::Result<Value, EngineError>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(result));
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        lock_inflight(&self.inflight).remove(&self.key);
        // An unsent tx drops here; followers observe the closed channel
    }
}

/// Per-feature cache of last-computed values plus the staleness policy
pub struct FreshnessTracker {
    namespace: String,
    /// Append-only history per (feature, key); the inner mutex serializes
    /// commits for one slot without a global write lock
    slots: RwLock<HashMap<SlotKey, Arc<Mutex<Vec<CachedValue>>>>>,
    /// At-most-one in-flight computation per (feature, key, as_of)
    inflight: InflightMap,
}

impl FreshnessTracker {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            slots: RwLock::new(HashMap::new()),
            inflight: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    fn slot_key(&self, feature: &str, key_fp: &str) -> SlotKey {
        (format!("{}:{}", self.namespace, feature), key_fp.to_string())
    }

    /// Does this feature need recomputation for this key at this as_of?
    ///
    /// Recompute when no cached record exists at or after `as_of -
    /// freshness`, or when an upstream input's computation timestamp is
    /// newer than our own last one (staleness cascades downstream).
    /// Key/Timestamp features are identity pass-throughs and always fresh.
    pub async fn needs_recompute(
        &self,
        def: &FeatureDefinition,
        provider_cadence_secs: i64,
        key_fp: &str,
        as_of: i64,
        upstream_latest: Option<i64>,
    ) -> bool {
        if def.is_passthrough() {
            return false;
        }

        let freshness = match def.kind {
            // Raw freshness is inherited from the provider's cadence
            FeatureKind::Raw | FeatureKind::RawLabel => provider_cadence_secs,
            _ => def.freshness_secs.unwrap_or(0),
        };

        let latest = self.latest(&def.name, key_fp, as_of).await;
        match latest {
            None => true,
            Some(cached) => {
                if cached.computed_at < as_of - freshness {
                    debug!(feature = %def.name, "cached value older than freshness window");
                    return true;
                }
                if let Some(upstream) = upstream_latest {
                    if upstream > cached.computed_at {
                        debug!(feature = %def.name, "upstream recomputed after our last value");
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Commit a new computation. Appends; never overwrites.
    pub async fn commit(&self, feature: &str, key_fp: &str, value: Value, computed_at: i64) {
        let slot = self.slot(feature, key_fp).await;
        let mut history = slot.lock().await;
        history.push(CachedValue { value, computed_at });
    }

    /// Most recent record with `computed_at <= as_of`.
    pub async fn latest(&self, feature: &str, key_fp: &str, as_of: i64) -> Option<CachedValue> {
        let slots = self.slots.read().await;
        let slot = slots.get(&self.slot_key(feature, key_fp))?.clone();
        drop(slots);
        let history = slot.lock().await;
        history
            .iter()
            .filter(|c| c.computed_at <= as_of)
            .max_by_key(|c| c.computed_at)
            .cloned()
    }

    /// Number of committed records for a slot, for supersede assertions.
    pub async fn history_len(&self, feature: &str, key_fp: &str) -> usize {
        let slots = self.slots.read().await;
        match slots.get(&self.slot_key(feature, key_fp)) {
            Some(slot) => slot.lock().await.len(),
            None => 0,
        }
    }

    async fn slot(&self, feature: &str, key_fp: &str) -> Arc<Mutex<Vec<CachedValue>>> {
        let key = self.slot_key(feature, key_fp);
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(&key) {
                return slot.clone();
            }
        }
        let mut slots = self.slots.write().await;
        slots.entry(key).or_default().clone()
    }

    /// Register interest in computing (feature, key, as_of). The first
    /// caller becomes the leader and holds the slot through an RAII guard;
    /// later callers receive a follower handle and await the in-flight
    /// result instead of re-issuing the work.
    pub fn coalesce(&self, feature: &str, key_fp: &str, as_of: i64) -> Coalesce {
        let key = (feature.to_string(), key_fp.to_string(), as_of);
        let mut inflight = lock_inflight(&self.inflight);
        if let Some(rx) = inflight.get(&key) {
            return Coalesce::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        inflight.insert(key.clone(), rx);
        Coalesce::Leader(InflightGuard {
            inflight: self.inflight.clone(),
            key,
            tx: Some(tx),
        })
    }

    /// Follower side: wait for the leader's published result.
    pub async fn await_inflight(
        mut rx: watch::Receiver<InflightResult>,
        feature: &str,
    ) -> Result<Value> {
        loop {
            if let Some(result) = rx.borrow().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(EngineError::Incomplete {
                    feature: feature.to_string(),
                    reason: "in-flight computation dropped without a result".to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_core::{DataType, FeatureDefinition, FeatureKind};

    fn derived(freshness: i64) -> FeatureDefinition {
        FeatureDefinition::new("total", "users", FeatureKind::Derived, DataType::Float64)
            .with_inputs(vec!["amount".into()])
            .with_freshness_secs(freshness)
    }

    #[tokio::test]
    async fn test_recompute_when_no_cache() {
        let tracker = FreshnessTracker::new("test");
        assert!(tracker.needs_recompute(&derived(60), 0, "u1", 100, None).await);
    }

    #[tokio::test]
    async fn test_fresh_within_window() {
        let tracker = FreshnessTracker::new("test");
        tracker.commit("total", "u1", Value::Int(5), 80).await;
        assert!(!tracker.needs_recompute(&derived(60), 0, "u1", 100, None).await);
        // Outside the freshness window
        assert!(tracker.needs_recompute(&derived(10), 0, "u1", 100, None).await);
    }

    #[tokio::test]
    async fn test_upstream_staleness_cascades() {
        let tracker = FreshnessTracker::new("test");
        tracker.commit("total", "u1", Value::Int(5), 80).await;
        // Own freshness window has not elapsed, but an input recomputed at 90
        assert!(tracker.needs_recompute(&derived(60), 0, "u1", 100, Some(90)).await);
        assert!(!tracker.needs_recompute(&derived(60), 0, "u1", 100, Some(70)).await);
    }

    #[tokio::test]
    async fn test_passthrough_always_fresh() {
        let tracker = FreshnessTracker::new("test");
        let key = FeatureDefinition::new("user_id", "users", FeatureKind::Key, DataType::Text);
        assert!(!tracker.needs_recompute(&key, 0, "u1", 100, Some(99)).await);
    }

    #[tokio::test]
    async fn test_commit_supersedes_never_edits() {
        let tracker = FreshnessTracker::new("test");
        tracker.commit("total", "u1", Value::Int(1), 10).await;
        tracker.commit("total", "u1", Value::Int(2), 20).await;

        assert_eq!(tracker.history_len("total", "u1").await, 2);
        assert_eq!(tracker.latest("total", "u1", 15).await.unwrap().value, Value::Int(1));
        assert_eq!(tracker.latest("total", "u1", 25).await.unwrap().value, Value::Int(2));
        assert!(tracker.latest("total", "u1", 5).await.is_none());
    }

    #[tokio::test]
    async fn test_namespace_isolates_slots() {
        let a = FreshnessTracker::new("a");
        a.commit("total", "u1", Value::Int(1), 10).await;
        let b = FreshnessTracker::new("b");
        assert!(b.latest("total", "u1", 100).await.is_none());
    }

    #[tokio::test]
    async fn test_coalesce_single_flight() {
        let tracker = Arc::new(FreshnessTracker::new("test"));

        let guard = match tracker.coalesce("total", "u1", 100) {
            Coalesce::Leader(guard) => guard,
            Coalesce::Follower(_) => panic!("first caller must lead"),
        };
        let follower = match tracker.coalesce("total", "u1", 100) {
            Coalesce::Follower(rx) => rx,
            Coalesce::Leader(_) => panic!("second caller must follow"),
        };

        let waiter = {
            let handle = tokio::spawn(async move {
                FreshnessTracker::await_inflight(follower, "total").await
            });
            guard.finish(Ok(Value::Int(42)));
            handle
        };
        assert_eq!(waiter.await.unwrap().unwrap(), Value::Int(42));

        // A distinct as_of coalesces independently
        assert!(matches!(
            tracker.coalesce("total", "u1", 200),
            Coalesce::Leader(_)
        ));
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_slot() {
        let tracker = Arc::new(FreshnessTracker::new("test"));

        let guard = match tracker.coalesce("total", "u1", 100) {
            Coalesce::Leader(guard) => guard,
            Coalesce::Follower(_) => panic!("first caller must lead"),
        };
        let follower = match tracker.coalesce("total", "u1", 100) {
            Coalesce::Follower(rx) => rx,
            Coalesce::Leader(_) => panic!("second caller must follow"),
        };

        // Leader cancelled before publishing a result
        drop(guard);

        // The waiting follower errors instead of blocking forever
        let err = FreshnessTracker::await_inflight(follower, "total")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Incomplete { .. }));

        // The slot is free again: the next caller leads
        assert!(matches!(
            tracker.coalesce("total", "u1", 100),
            Coalesce::Leader(_)
        ));
    }
}
