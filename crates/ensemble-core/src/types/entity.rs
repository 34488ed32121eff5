//! Entity schemas
//!
//! An entity names a key space: the columns that identify the real-world
//! object a row describes, plus the column that orders rows in time.
//! Features belonging to entities with matching key names can be combined
//! directly; crossing key spaces requires a declared lookup.

use serde::{Deserialize, Serialize};

/// A named key space shared by a set of features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity name, e.g. "users" or "orders"
    pub name: String,

    /// Ordered key field names, e.g. ["user_id"]. Keys match across
    /// entities by name.
    pub keys: Vec<String>,

    /// Field carrying the record timestamp, used for windowed aggregation
    /// ordering and point-in-time lookups
    pub timestamp_field: String,

    /// Format of the timestamp field, e.g. "epoch_seconds"
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

fn default_timestamp_format() -> String {
    "epoch_seconds".to_string()
}

impl EntitySchema {
    pub fn new(
        name: impl Into<String>,
        keys: Vec<String>,
        timestamp_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            keys,
            timestamp_field: timestamp_field.into(),
            timestamp_format: default_timestamp_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_construction() {
        let schema = EntitySchema::new("users", vec!["user_id".into()], "updated_at");
        assert_eq!(schema.name, "users");
        assert_eq!(schema.keys, vec!["user_id"]);
        assert_eq!(schema.timestamp_format, "epoch_seconds");
    }

    #[test]
    fn test_schema_yaml_default_format() {
        let yaml = "name: orders\nkeys: [order_id, user_id]\ntimestamp_field: created_at\n";
        let schema: EntitySchema = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(schema.keys.len(), 2);
        assert_eq!(schema.timestamp_format, "epoch_seconds");
    }
}
