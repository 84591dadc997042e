//! Maps incoming requests to rate limit windows.

use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

use aegis_core::{TenantId, TenantTier};
use ipnetwork::IpNetwork;
use regex::Regex;

use crate::config::RateLimitConfig;

static UUID_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}(/|$)")
        .expect("Invalid uuid segment regex")
});

static NUMERIC_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/[0-9]+(/|$)").expect("Invalid numeric segment regex"));

const PRIVATE_NETWORKS: &[&str] = &[
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "127.0.0.0/8",
    "::1/128",
    "fc00::/7",
];

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Invalid CIDR '{value}' in {field}: {message}")]
    InvalidNetwork {
        field: &'static str,
        value: String,
        message: String,
    },
}

/// Collapses a request path into its route class: trailing slash removed,
/// UUID and numeric segments replaced by `:id`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };
    let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
    // Adjacent id segments share a slash, so each pass can miss every second one.
    let mut normalized = trimmed.to_string();
    for re in [&*UUID_SEGMENT, &*NUMERIC_SEGMENT] {
        loop {
            let next = re.replace_all(&normalized, "/:id$1").into_owned();
            if next == normalized {
                break;
            }
            normalized = next;
        }
    }
    normalized
}

/// The window a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitTarget {
    pub identifier: String,
    pub route_class: String,
    pub limit: u32,
    pub window: Duration,
}

/// Decides which window and limit apply to a request.
///
/// In order of precedence:
///
/// 1. exempt paths and allowlisted clients are not limited;
/// 2. routes with an endpoint limit are limited per client IP;
/// 3. requests of a known tenant share the tenant's tier budget;
/// 4. everything else gets the default per-IP limit, doubled (by default)
///    for clients on private networks.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    config: RateLimitConfig,
    allowlist: Vec<IpNetwork>,
    trusted_proxies: Vec<IpNetwork>,
    private: Vec<IpNetwork>,
}

fn parse_networks(field: &'static str, values: &[String]) -> Result<Vec<IpNetwork>, PolicyError> {
    values
        .iter()
        .map(|value| {
            value
                .parse::<IpNetwork>()
                .map_err(|e| PolicyError::InvalidNetwork {
                    field,
                    value: value.clone(),
                    message: e.to_string(),
                })
        })
        .collect()
}

impl RoutePolicy {
    pub fn new(config: RateLimitConfig) -> Result<Self, PolicyError> {
        let allowlist = parse_networks("allowlist", &config.allowlist)?;
        let trusted_proxies = parse_networks("trusted_proxies", &config.trusted_proxies)?;
        let private = PRIVATE_NETWORKS
            .iter()
            .filter_map(|cidr| cidr.parse().ok())
            .collect();
        Ok(Self {
            config,
            allowlist,
            trusted_proxies,
            private,
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn is_exempt_path(&self, path: &str) -> bool {
        let route = normalize_path(path);
        self.config.exempt_paths.iter().any(|p| *p == route)
    }

    fn is_private(&self, ip: IpAddr) -> bool {
        self.private.iter().any(|net| net.contains(ip))
    }

    fn is_trusted_proxy(&self, ip: IpAddr) -> bool {
        self.trusted_proxies.iter().any(|net| net.contains(ip))
    }

    /// Client address of a request.
    ///
    /// `X-Forwarded-For` is only honoured when the direct peer is a trusted
    /// proxy; the header is then read right to left and the first address
    /// that is not itself a trusted proxy is the client.
    pub fn client_ip(&self, peer: IpAddr, forwarded_for: Option<&str>) -> IpAddr {
        if !self.is_trusted_proxy(peer) {
            return peer;
        }
        let Some(header) = forwarded_for else {
            return peer;
        };
        let mut client = peer;
        for hop in header.rsplit(',') {
            match hop.trim().parse::<IpAddr>() {
                Ok(ip) if self.is_trusted_proxy(ip) => client = ip,
                Ok(ip) => return ip,
                Err(_) => break,
            }
        }
        client
    }

    /// Default per-IP limit for `ip`.
    pub fn ip_limit(&self, ip: IpAddr) -> u32 {
        if self.is_private(ip) {
            self.config
                .default_limit
                .saturating_mul(self.config.private_network_multiplier.max(1))
        } else {
            self.config.default_limit
        }
    }

    /// Window for a request, or `None` if it is not limited.
    pub fn target(
        &self,
        path: &str,
        client_ip: IpAddr,
        tenant: Option<(TenantId, TenantTier)>,
    ) -> Option<RateLimitTarget> {
        if !self.config.enabled {
            return None;
        }
        let route = normalize_path(path);
        if self.config.exempt_paths.iter().any(|p| *p == route)
            || self.allowlist.iter().any(|net| net.contains(client_ip))
        {
            return None;
        }

        let window = self.config.window;
        if let Some(limit) = self.config.endpoint_limits.get(&route) {
            return Some(RateLimitTarget {
                identifier: format!("ip:{client_ip}"),
                route_class: route,
                limit: *limit,
                window,
            });
        }

        if self.config.tenant_limits
            && let Some((tenant_id, tier)) = tenant
        {
            return Some(RateLimitTarget {
                identifier: format!("tenant:{tenant_id}"),
                route_class: "tenant".to_string(),
                limit: self.config.tier_limits.limit_for(tier),
                window,
            });
        }

        Some(RateLimitTarget {
            identifier: format!("ip:{client_ip}"),
            route_class: route,
            limit: self.ip_limit(client_ip),
            window,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(config: RateLimitConfig) -> RoutePolicy {
        RoutePolicy::new(config).unwrap()
    }

    fn ip(value: &str) -> IpAddr {
        value.parse().unwrap()
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/api/test/"), "/api/test");
        assert_eq!(
            normalize_path("/api/users/12345678-1234-1234-1234-123456789abc/profile"),
            "/api/users/:id/profile"
        );
        assert_eq!(normalize_path("/api/items/12345"), "/api/items/:id");
        assert_eq!(normalize_path("/a/1/2/3"), "/a/:id/:id/:id");
        assert_eq!(normalize_path("/v2/items"), "/v2/items");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn test_private_networks_get_double_limit() {
        let policy = policy(RateLimitConfig::default());
        assert_eq!(policy.ip_limit(ip("203.0.113.1")), 100);
        assert_eq!(policy.ip_limit(ip("10.0.0.1")), 200);
        assert_eq!(policy.ip_limit(ip("192.168.1.1")), 200);
        assert_eq!(policy.ip_limit(ip("fd00::1")), 200);
    }

    #[test]
    fn test_exempt_paths() {
        let policy = policy(RateLimitConfig::default());
        for path in ["/health", "/ready/", "/.well-known/jwks.json"] {
            assert!(policy.target(path, ip("203.0.113.1"), None).is_none(), "{path}");
        }
    }

    #[test]
    fn test_endpoint_limits_beat_tenant_limits() {
        let policy = policy(RateLimitConfig::default());
        let tenant = Some((TenantId::new(), TenantTier::Enterprise));

        let signin = policy.target("/auth/signin", ip("203.0.113.1"), tenant).unwrap();
        assert_eq!(signin.limit, 10);
        assert_eq!(signin.identifier, "ip:203.0.113.1");

        let other = policy.target("/sessions", ip("203.0.113.1"), tenant).unwrap();
        assert_eq!(other.limit, 10_000);
        assert!(other.identifier.starts_with("tenant:"));

        let anonymous = policy.target("/items/7", ip("203.0.113.1"), None).unwrap();
        assert_eq!(anonymous.limit, 100);
        assert_eq!(anonymous.route_class, "/items/:id");
    }

    #[test]
    fn test_forwarded_for_only_from_trusted_proxies() {
        let policy = policy(RateLimitConfig {
            trusted_proxies: vec!["10.1.0.0/16".into()],
            ..RateLimitConfig::default()
        });
        let header = Some("198.51.100.7, 10.1.0.5");

        assert_eq!(policy.client_ip(ip("10.1.0.9"), header), ip("198.51.100.7"));
        assert_eq!(policy.client_ip(ip("203.0.113.1"), header), ip("203.0.113.1"));
        assert_eq!(policy.client_ip(ip("10.1.0.9"), None), ip("10.1.0.9"));
        // A spoofed leftmost entry is ignored when a real client sits to its right.
        assert_eq!(
            policy.client_ip(ip("10.1.0.9"), Some("1.1.1.1, 198.51.100.7")),
            ip("198.51.100.7")
        );
    }

    #[test]
    fn test_allowlist_and_invalid_cidr() {
        let policy = policy(RateLimitConfig {
            allowlist: vec!["198.51.100.0/24".into()],
            ..RateLimitConfig::default()
        });
        assert!(policy.target("/sessions", ip("198.51.100.20"), None).is_none());

        let err = RoutePolicy::new(RateLimitConfig {
            trusted_proxies: vec!["not-a-network".into()],
            ..RateLimitConfig::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("trusted_proxies"));
    }
}
