use std::collections::BTreeMap;
use std::time::Duration;

use aegis_core::TenantTier;
use serde::{Deserialize, Serialize};

/// Requests per window for each tenant tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierLimits {
    pub community: u32,
    pub pro: u32,
    pub scale: u32,
    pub enterprise: u32,
}

impl TierLimits {
    pub fn limit_for(&self, tier: TenantTier) -> u32 {
        match tier {
            TenantTier::Community => self.community,
            TenantTier::Pro => self.pro,
            TenantTier::Scale => self.scale,
            TenantTier::Enterprise => self.enterprise,
        }
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            community: 100,
            pro: 1000,
            scale: 5000,
            enterprise: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,

    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Per-client limit for routes without a more specific rule.
    pub default_limit: u32,

    /// Stricter per-client limits keyed by normalized path.
    pub endpoint_limits: BTreeMap<String, u32>,

    /// Limit authenticated traffic per tenant according to its tier.
    pub tenant_limits: bool,
    pub tier_limits: TierLimits,

    /// Multiplier applied to the default limit for private-network clients.
    pub private_network_multiplier: u32,

    /// Paths never limited (health probes, key discovery).
    pub exempt_paths: Vec<String>,

    /// CIDR ranges never limited.
    pub allowlist: Vec<String>,

    /// CIDR ranges of proxies whose `X-Forwarded-For` header is trusted.
    pub trusted_proxies: Vec<String>,
}

fn default_endpoint_limits() -> BTreeMap<String, u32> {
    BTreeMap::from([
        ("/auth/signin".to_string(), 10),
        ("/auth/signup".to_string(), 5),
        ("/auth/refresh".to_string(), 30),
    ])
}

fn default_exempt_paths() -> Vec<String> {
    ["/health", "/ready", "/.well-known/jwks.json"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(60),
            default_limit: 100,
            endpoint_limits: default_endpoint_limits(),
            tenant_limits: true,
            tier_limits: TierLimits::default(),
            private_network_multiplier: 2,
            exempt_paths: default_exempt_paths(),
            allowlist: Vec::new(),
            trusted_proxies: Vec::new(),
        }
    }
}
