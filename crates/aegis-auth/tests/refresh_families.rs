//! Refresh token families under replay and concurrency.

use std::sync::Arc;
use std::time::Duration;

use aegis_audit::{AuditConfig, AuditPipeline};
use aegis_auth::{AuthConfig, JwtService, SessionConfig, SessionStore, SigningKeyPair, TokenService};
use aegis_core::{DeviceInfo, RevokeReason, SecurityError, TenantId, UserId};
use aegis_db_memory::{InMemoryAuditStorage, InMemoryCacheStore, InMemorySessionStorage};
use aegis_storage::SessionStorage;

struct Harness {
    service: TokenService,
    sessions: Arc<InMemorySessionStorage>,
    cache: Arc<InMemoryCacheStore>,
    audit: Arc<InMemoryAuditStorage>,
}

fn harness() -> Harness {
    let sessions = Arc::new(InMemorySessionStorage::new());
    let cache = Arc::new(InMemoryCacheStore::new());
    let audit = Arc::new(InMemoryAuditStorage::new());
    let pipeline = AuditPipeline::new(audit.clone(), None, AuditConfig::default());
    let config = AuthConfig::default();
    let jwt = JwtService::new(
        SigningKeyPair::from_secret(b"integration-secret-integration-secret").expect("key"),
        config.issuer.clone(),
    );
    let store = SessionStore::new(sessions.clone(), cache.clone(), &SessionConfig::default());
    Harness {
        service: TokenService::new(Arc::new(jwt), store, pipeline, &config),
        sessions,
        cache,
        audit,
    }
}

async fn wait_for_action(audit: &InMemoryAuditStorage, action: &str) -> aegis_core::AuditLogEntry {
    for _ in 0..100 {
        if let Some(entry) = audit.entries().await.into_iter().find(|e| e.action == action) {
            return entry;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no audit entry for {action}");
}

#[tokio::test]
async fn test_replaying_a_consumed_token_revokes_the_family() {
    let h = harness();
    let user = UserId::new();
    let tenant = TenantId::new();

    let a = h.service.issue(user, tenant, DeviceInfo::default()).await.unwrap();
    let b = h.service.refresh(&a.refresh_token).await.unwrap();
    let c = h.service.refresh(&b.refresh_token).await.unwrap();
    assert!(h.service.verify(&c.access_token).await.is_ok());

    let replay = h.service.refresh(&a.refresh_token).await;
    assert!(matches!(replay, Err(SecurityError::TokenReused)));

    let session = h.sessions.get(a.session_id).await.unwrap().unwrap();
    assert_eq!(session.revoke_reason, Some(RevokeReason::TokenReuse));

    // Even the newest tokens of the family are dead now.
    assert!(matches!(
        h.service.refresh(&c.refresh_token).await,
        Err(SecurityError::SessionRevoked)
    ));
    assert!(matches!(
        h.service.verify(&c.access_token).await,
        Err(SecurityError::SessionRevoked)
    ));

    let entry = wait_for_action(&h.audit, "token.reused").await;
    assert_eq!(entry.tenant_id, Some(tenant));
    assert_eq!(entry.risk_score, Some(90));
    assert_eq!(entry.details["revokedSessions"], 1);
}

#[tokio::test]
async fn test_other_families_survive_reuse() {
    let h = harness();
    let user = UserId::new();
    let tenant = TenantId::new();

    let laptop = h.service.issue(user, tenant, DeviceInfo::default()).await.unwrap();
    let phone = h.service.issue(user, tenant, DeviceInfo::default()).await.unwrap();
    h.service.refresh(&laptop.refresh_token).await.unwrap();
    assert!(matches!(
        h.service.refresh(&laptop.refresh_token).await,
        Err(SecurityError::TokenReused)
    ));

    assert!(h.service.verify(&phone.access_token).await.is_ok());
    assert!(h.service.refresh(&phone.refresh_token).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_has_one_winner() {
    let h = harness();
    let pair = h
        .service
        .issue(UserId::new(), TenantId::new(), DeviceInfo::default())
        .await
        .unwrap();

    let first = tokio::spawn({
        let service = h.service.clone();
        let token = pair.refresh_token.clone();
        async move { service.refresh(&token).await }
    });
    let second = tokio::spawn({
        let service = h.service.clone();
        let token = pair.refresh_token.clone();
        async move { service.refresh(&token).await }
    });
    let results = [first.await.unwrap(), second.await.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let reused = results
        .iter()
        .filter(|r| matches!(r, Err(SecurityError::TokenReused)))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(reused, 1);

    let session = h.sessions.get(pair.session_id).await.unwrap().unwrap();
    assert_eq!(session.rotation_count, 1);
    assert!(session.is_revoked());
}

#[tokio::test]
async fn test_verify_falls_back_to_durable_store_when_cache_is_down() {
    let h = harness();
    let pair = h
        .service
        .issue(UserId::new(), TenantId::new(), DeviceInfo::default())
        .await
        .unwrap();

    h.cache.outage().set(true);
    assert!(h.service.verify(&pair.access_token).await.is_ok());

    h.sessions
        .revoke(pair.session_id, RevokeReason::Revoked, time::OffsetDateTime::now_utc())
        .await
        .unwrap();
    assert!(matches!(
        h.service.verify(&pair.access_token).await,
        Err(SecurityError::SessionRevoked)
    ));
}

#[tokio::test]
async fn test_old_access_token_stays_valid_until_expiry() {
    let h = harness();
    let a = h
        .service
        .issue(UserId::new(), TenantId::new(), DeviceInfo::default())
        .await
        .unwrap();
    h.service.refresh(&a.refresh_token).await.unwrap();
    assert!(h.service.verify(&a.access_token).await.is_ok());
}
