use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use aegis_core::{TenantId, TenantTier};
use aegis_db_memory::InMemoryCacheStore;
use aegis_ratelimit::{RateLimitConfig, RateLimiter, RoutePolicy, TierLimits};

async fn admitted(limiter: &RateLimiter, policy: &RoutePolicy, path: &str, ip: IpAddr, tenant: Option<(TenantId, TenantTier)>, attempts: u32) -> u32 {
    let mut allowed = 0;
    for _ in 0..attempts {
        let target = policy.target(path, ip, tenant).expect("route is limited");
        let decision = limiter
            .check_route(&target.identifier, &target.route_class, target.window, target.limit)
            .await;
        if decision.allowed {
            allowed += 1;
        }
    }
    allowed
}

#[tokio::test]
async fn signin_is_limited_per_client() {
    let limiter = RateLimiter::new(Arc::new(InMemoryCacheStore::new()));
    let policy = RoutePolicy::new(RateLimitConfig::default()).unwrap();
    let attacker: IpAddr = "203.0.113.9".parse().unwrap();
    let bystander: IpAddr = "203.0.113.10".parse().unwrap();

    assert_eq!(admitted(&limiter, &policy, "/auth/signin", attacker, None, 15).await, 10);
    assert_eq!(admitted(&limiter, &policy, "/auth/signin/", bystander, None, 1).await, 1);

    limiter.reset(&format!("ip:{attacker}")).await.unwrap();
    assert_eq!(admitted(&limiter, &policy, "/auth/signin", attacker, None, 1).await, 1);
}

#[tokio::test]
async fn tenant_budget_is_shared_across_clients() {
    let limiter = RateLimiter::new(Arc::new(InMemoryCacheStore::new()));
    let policy = RoutePolicy::new(RateLimitConfig {
        window: Duration::from_secs(30),
        tier_limits: TierLimits {
            community: 3,
            ..TierLimits::default()
        },
        ..RateLimitConfig::default()
    })
    .unwrap();
    let tenant = Some((TenantId::new(), TenantTier::Community));

    let first = admitted(&limiter, &policy, "/sessions", "203.0.113.1".parse().unwrap(), tenant, 2).await;
    let second = admitted(&limiter, &policy, "/sessions/42", "203.0.113.2".parse().unwrap(), tenant, 2).await;
    assert_eq!(first + second, 3);
}
