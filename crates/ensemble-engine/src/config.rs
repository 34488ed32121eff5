//! Engine configuration
//!
//! An explicit configuration object passed to the resolver at construction.
//! There is no process-wide client or namespace singleton; two resolvers
//! with different configurations can coexist in one process.

use serde::{Deserialize, Serialize};

/// Resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Namespace prefixed to cache keys, isolating co-hosted graphs
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Bounded retries for ExecutionFailure on idempotent code units
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Trailing-buffer bound for serving-mode materialization, in seconds.
    /// A count window the buffer cannot fill falls back to a full history
    /// scan rather than silently shortening the window.
    #[serde(default = "default_serving_lookback")]
    pub serving_lookback_secs: i64,

    /// Default per-request deadline in milliseconds; 0 disables
    #[serde(default = "default_deadline_ms")]
    pub default_deadline_ms: u64,

    /// When true, a failed data check fails the row; otherwise checks are
    /// fire-and-forget and reported as row warnings
    #[serde(default)]
    pub blocking_data_checks: bool,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_serving_lookback() -> i64 {
    30 * 86_400
}

fn default_deadline_ms() -> u64 {
    0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            max_retries: default_max_retries(),
            serving_lookback_secs: default_serving_lookback(),
            default_deadline_ms: default_deadline_ms(),
            blocking_data_checks: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.serving_lookback_secs, 2_592_000);
        assert!(!config.blocking_data_checks);
    }

    #[test]
    fn test_partial_yaml() {
        let config: EngineConfig =
            serde_yaml::from_str("namespace: fraud\nblocking_data_checks: true\n").unwrap();
        assert_eq!(config.namespace, "fraud");
        assert!(config.blocking_data_checks);
        assert_eq!(config.max_retries, 2);
    }
}
