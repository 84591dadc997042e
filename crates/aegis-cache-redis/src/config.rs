use serde::{Deserialize, Serialize};

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Use Redis for the cache. When disabled an in-process cache is used,
    /// which is only correct for single-instance deployments.
    pub enabled: bool,

    /// Connection URL, e.g. `redis://localhost:6379`.
    pub url: String,

    pub pool_size: usize,

    /// Timeout for acquiring, creating and recycling connections.
    pub timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "redis://localhost:6379".to_string(),
            pool_size: 16,
            timeout_ms: 2000,
        }
    }
}
