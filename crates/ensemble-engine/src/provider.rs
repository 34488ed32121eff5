//! Data provider boundary
//!
//! Raw features come from outside the engine. A `DataProvider` exposes just
//! enough surface for context materialization: a range scan for batch
//! (training) resolution and a point lookup for serving. Wire formats,
//! credentials and concrete infrastructure live behind the trait.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use ensemble_core::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Key tuple identifying one entity instance, e.g. {"user_id": "u1"}.
/// BTreeMap keeps the fingerprint used in cache keys deterministic.
pub type KeyTuple = BTreeMap<String, Value>;

/// Render a key tuple as a stable cache-key fragment.
pub fn key_fingerprint(key: &KeyTuple) -> String {
    let mut parts = Vec::with_capacity(key.len());
    for (field, value) in key {
        let rendered = match value {
            Value::Text(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => "null".to_string(),
            Value::Vector(_) => "[vector]".to_string(),
        };
        parts.push(format!("{field}={rendered}"));
    }
    parts.join(",")
}

/// One raw row from a provider
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Record timestamp, epoch seconds
    pub timestamp: i64,
    /// Insertion sequence, the stable tie-break for equal timestamps
    pub seq: u64,
    /// Field values
    pub values: HashMap<String, Value>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// Collaborator supplying raw records for an entity's key space
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Records for one key with timestamps in the half-open range
    /// [start, end), ordered by (timestamp, seq) ascending.
    async fn fetch_records(
        &self,
        entity: &str,
        key: &KeyTuple,
        range: (i64, i64),
    ) -> Result<Vec<Record>>;

    /// The most recent record for one key at or before `as_of`.
    async fn fetch_latest(&self, entity: &str, key: &KeyTuple, as_of: i64)
        -> Result<Option<Record>>;

    /// Declared update cadence of the entity's upstream source, in seconds.
    /// Raw feature freshness is inherited from this, never user-set.
    fn update_cadence_secs(&self, entity: &str) -> i64;
}

/// In-memory provider for tests and fixtures
pub struct MemoryProvider {
    rows: RwLock<HashMap<(String, String), Vec<Record>>>,
    cadences: HashMap<String, i64>,
    next_seq: RwLock<u64>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            cadences: HashMap::new(),
            next_seq: RwLock::new(0),
        }
    }

    pub fn with_cadence(mut self, entity: impl Into<String>, secs: i64) -> Self {
        self.cadences.insert(entity.into(), secs);
        self
    }

    /// Insert a record; assigns the insertion sequence number.
    pub async fn push(
        &self,
        entity: &str,
        key: &KeyTuple,
        timestamp: i64,
        values: HashMap<String, Value>,
    ) {
        let seq = {
            let mut next = self.next_seq.write().await;
            let seq = *next;
            *next += 1;
            seq
        };
        let mut rows = self.rows.write().await;
        rows.entry((entity.to_string(), key_fingerprint(key)))
            .or_default()
            .push(Record {
                timestamp,
                seq,
                values,
            });
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataProvider for MemoryProvider {
    async fn fetch_records(
        &self,
        entity: &str,
        key: &KeyTuple,
        range: (i64, i64),
    ) -> Result<Vec<Record>> {
        let rows = self.rows.read().await;
        let mut out: Vec<Record> = rows
            .get(&(entity.to_string(), key_fingerprint(key)))
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.timestamp >= range.0 && r.timestamp < range.1)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|r| (r.timestamp, r.seq));
        Ok(out)
    }

    async fn fetch_latest(
        &self,
        entity: &str,
        key: &KeyTuple,
        as_of: i64,
    ) -> Result<Option<Record>> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&(entity.to_string(), key_fingerprint(key)))
            .and_then(|records| {
                records
                    .iter()
                    .filter(|r| r.timestamp <= as_of)
                    .max_by_key(|r| (r.timestamp, r.seq))
                    .cloned()
            }))
    }

    fn update_cadence_secs(&self, entity: &str) -> i64 {
        self.cadences.get(entity).copied().unwrap_or(0)
    }
}

/// Provider that always fails, for exercising error paths
pub struct FailingProvider;

#[async_trait]
impl DataProvider for FailingProvider {
    async fn fetch_records(
        &self,
        entity: &str,
        _key: &KeyTuple,
        _range: (i64, i64),
    ) -> Result<Vec<Record>> {
        Err(EngineError::Provider(format!("unreachable source for '{entity}'")))
    }

    async fn fetch_latest(
        &self,
        entity: &str,
        _key: &KeyTuple,
        _as_of: i64,
    ) -> Result<Option<Record>> {
        Err(EngineError::Provider(format!("unreachable source for '{entity}'")))
    }

    fn update_cadence_secs(&self, _entity: &str) -> i64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_key(id: &str) -> KeyTuple {
        let mut key = KeyTuple::new();
        key.insert("user_id".to_string(), Value::Text(id.to_string()));
        key
    }

    #[tokio::test]
    async fn test_fetch_records_half_open_range() {
        let provider = MemoryProvider::new();
        let key = user_key("u1");
        for ts in [10, 20, 30] {
            let mut values = HashMap::new();
            values.insert("amount".to_string(), Value::Int(ts));
            provider.push("users", &key, ts, values).await;
        }

        let records = provider.fetch_records("users", &key, (10, 30)).await.unwrap();
        let stamps: Vec<i64> = records.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_fetch_latest_respects_as_of() {
        let provider = MemoryProvider::new();
        let key = user_key("u1");
        for ts in [10, 20, 30] {
            provider.push("users", &key, ts, HashMap::new()).await;
        }

        let latest = provider.fetch_latest("users", &key, 25).await.unwrap().unwrap();
        assert_eq!(latest.timestamp, 20);
        assert!(provider.fetch_latest("users", &key, 5).await.unwrap().is_none());
    }

    #[test]
    fn test_key_fingerprint_deterministic() {
        let mut a = KeyTuple::new();
        a.insert("b".to_string(), Value::Int(2));
        a.insert("a".to_string(), Value::Int(1));
        assert_eq!(key_fingerprint(&a), "a=1,b=2");
    }
}
