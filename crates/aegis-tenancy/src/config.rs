use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenancyConfig {
    /// Upper bound on open per-tenant stores (schema and database modes).
    pub max_cached_stores: u64,
    /// A per-tenant store unused for this long is dropped, closing its pool.
    #[serde(with = "humantime_serde")]
    pub store_idle_timeout: Duration,
    /// How long a tenant record is trusted before it is reloaded. Bounds how
    /// late a suspension takes effect on other instances.
    #[serde(with = "humantime_serde")]
    pub tenant_cache_ttl: Duration,
    /// Pool size for database-per-tenant stores without an explicit limit.
    pub default_max_connections: u32,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            max_cached_stores: 256,
            store_idle_timeout: Duration::from_secs(15 * 60),
            tenant_cache_ttl: Duration::from_secs(30),
            default_max_connections: 5,
        }
    }
}
