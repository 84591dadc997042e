use aegis_core::{SessionId, TenantId};

/// Builds namespaced cache keys: `aegis:{entity}:{tenant}:{id}`.
pub struct CacheKey;

impl CacheKey {
    pub const PREFIX: &'static str = "aegis";

    pub fn session(tenant_id: TenantId, session_id: SessionId) -> String {
        format!("{}:session:{tenant_id}:{session_id}", Self::PREFIX)
    }

    /// All cached sessions of one tenant.
    pub fn session_pattern(tenant_id: TenantId) -> String {
        format!("{}:session:{tenant_id}:*", Self::PREFIX)
    }

    /// Sliding window of `identifier` for one route class.
    pub fn rate_limit(identifier: &str, route_class: &str) -> String {
        format!(
            "{}:ratelimit:{}:{}",
            Self::PREFIX,
            identifier,
            route_class
        )
    }

    /// Every window of `identifier`, with glob metacharacters in the
    /// identifier escaped.
    pub fn rate_limit_pattern(identifier: &str) -> String {
        format!("{}:ratelimit:{}:*", Self::PREFIX, escape_glob(identifier))
    }

    pub fn login_failures(tenant_id: TenantId, subject: &str) -> String {
        format!("{}:lockout:{tenant_id}:{subject}:failures", Self::PREFIX)
    }

    /// Last failure count seen in the window, kept for status reads.
    pub fn login_failure_count(tenant_id: TenantId, subject: &str) -> String {
        format!("{}:lockout:{tenant_id}:{subject}:count", Self::PREFIX)
    }

    pub fn login_lock(tenant_id: TenantId, subject: &str) -> String {
        format!("{}:lockout:{tenant_id}:{subject}:locked", Self::PREFIX)
    }
}

fn escape_glob(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
