//! Token issuance, rotation, verification and revocation.

use std::sync::Arc;
use std::time::Duration;

use aegis_audit::AuditPipeline;
use aegis_core::{
    Actor, AuditEvent, AuditOutcome, Capability, DeviceInfo, FamilyId, RequestContext,
    RevokeReason, SecurityError, SecurityResult, Session, SessionId, TenantId, UserId,
};
use aegis_storage::{RotateOutcome, RotateRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::jwt::{Jwks, JwtService, TokenClaims, TokenType};
use crate::lockout::{LockStatus, LoginLockout};
use crate::session_store::SessionStore;

/// Tokens handed to a client after sign-in or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    pub session_id: SessionId,
}

impl TokenClaims {
    /// Request context for the caller these access token claims describe.
    pub fn to_context(&self) -> SecurityResult<RequestContext> {
        let user_id: UserId = self
            .sub
            .parse()
            .map_err(|_| SecurityError::token_invalid("malformed subject"))?;
        let capabilities = self.caps.iter().filter_map(|c| Capability::parse(c));
        Ok(RequestContext::new(self.tid, Actor::user(user_id))
            .with_session(self.sid)
            .with_capabilities(capabilities))
    }
}

fn to_time(d: Duration) -> time::Duration {
    time::Duration::try_from(d).unwrap_or(time::Duration::MAX)
}

/// Issues and rotates token pairs backed by session records.
///
/// Each sign-in starts a refresh token family. Only the newest refresh
/// token of a family can be exchanged; presenting an older one revokes the
/// whole family and fails with [`SecurityError::TokenReused`].
#[derive(Clone)]
pub struct TokenService {
    jwt: Arc<JwtService>,
    sessions: SessionStore,
    audit: AuditPipeline,
    lockout: Option<LoginLockout>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(
        jwt: Arc<JwtService>,
        sessions: SessionStore,
        audit: AuditPipeline,
        config: &AuthConfig,
    ) -> Self {
        Self {
            jwt,
            sessions,
            audit,
            lockout: None,
            access_ttl: config.access_token_ttl,
            refresh_ttl: config.refresh_token_ttl,
        }
    }

    /// Refuses to issue tokens to locked accounts and clears failed
    /// attempts once a sign-in succeeds.
    pub fn with_lockout(mut self, lockout: LoginLockout) -> Self {
        self.lockout = Some(lockout);
        self
    }

    pub fn lockout(&self) -> Option<&LoginLockout> {
        self.lockout.as_ref()
    }

    /// Reports a failed primary authentication of `user_id`.
    ///
    /// Sign-in flows call this on a bad credential; enough failures within
    /// the lockout window lock the account and [`issue`](Self::issue) is
    /// refused until the lock expires.
    pub async fn record_failed_login(&self, tenant_id: TenantId, user_id: UserId) -> LockStatus {
        match &self.lockout {
            Some(lockout) => lockout.record_failure(tenant_id, &user_id.to_string()).await,
            None => LockStatus::Open {
                remaining_attempts: u32::MAX,
            },
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn jwks(&self) -> Jwks {
        self.jwt.jwks()
    }

    /// Starts a session for a user who has just authenticated.
    pub async fn issue(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        device: DeviceInfo,
    ) -> SecurityResult<TokenPair> {
        self.issue_with_capabilities(user_id, tenant_id, device, &[])
            .await
    }

    /// Like [`issue`](Self::issue), embedding administrative capabilities in
    /// the tokens. They are carried forward on every refresh.
    #[instrument(skip(self, device, capabilities), fields(session_id))]
    pub async fn issue_with_capabilities(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        device: DeviceInfo,
        capabilities: &[Capability],
    ) -> SecurityResult<TokenPair> {
        if let Some(lockout) = &self.lockout
            && let LockStatus::Locked { until } =
                lockout.status(tenant_id, &user_id.to_string()).await
        {
            let retry_after = (until - OffsetDateTime::now_utc()).whole_seconds().max(1);
            warn!(tenant_id = %tenant_id, user_id = %user_id, "Sign-in refused, account locked");
            return Err(SecurityError::rate_limited(retry_after.unsigned_abs()));
        }

        let now = OffsetDateTime::now_utc();
        let session = Session {
            id: SessionId::new(),
            tenant_id,
            user_id,
            family_id: FamilyId::new(),
            access_token_id: Uuid::new_v4(),
            refresh_token_id: Uuid::new_v4(),
            device,
            created_at: now,
            last_activity_at: now,
            expires_at: now + to_time(self.refresh_ttl),
            revoked_at: None,
            revoke_reason: None,
            rotation_count: 0,
        };
        tracing::Span::current().record("session_id", tracing::field::display(session.id));

        let caps: Vec<String> = capabilities.iter().map(|c| c.as_str().to_string()).collect();
        let pair = self.mint(&session, &caps)?;
        self.sessions.create(&session).await?;
        if let Some(lockout) = &self.lockout {
            lockout.record_success(tenant_id, &user_id.to_string()).await;
        }

        info!(tenant_id = %tenant_id, user_id = %user_id, family_id = %session.family_id, "Session created");
        let mut event = AuditEvent::builder("session.created")
            .tenant(tenant_id)
            .actor(Actor::user(user_id))
            .resource("session", session.id);
        if let Some(ip) = &session.device.ip_address {
            event = event.ip_address(ip.clone());
        }
        if let Some(ua) = &session.device.user_agent {
            event = event.user_agent(ua.clone());
        }
        self.audit.record(event.build());
        Ok(pair)
    }

    fn mint(&self, session: &Session, caps: &[String]) -> SecurityResult<TokenPair> {
        let iat = OffsetDateTime::now_utc().unix_timestamp();
        let claims = |typ, jti, ttl: Duration, fid| TokenClaims {
            iss: self.jwt.issuer().to_string(),
            sub: session.user_id.to_string(),
            tid: session.tenant_id,
            sid: session.id,
            typ,
            fid,
            jti,
            iat,
            exp: iat.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
            caps: caps.to_vec(),
        };

        let access = claims(TokenType::Access, session.access_token_id, self.access_ttl, None);
        let refresh = claims(
            TokenType::Refresh,
            session.refresh_token_id,
            self.refresh_ttl,
            Some(session.family_id),
        );
        Ok(TokenPair {
            access_token: self.jwt.encode(&access)?,
            refresh_token: self.jwt.encode(&refresh)?,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.as_secs(),
            session_id: session.id,
        })
    }

    /// Exchanges a refresh token for a new pair in the same family.
    ///
    /// The check-and-rotate is a single conditional update in the durable
    /// store, so of two concurrent calls with the same token exactly one
    /// succeeds and the other is treated as reuse.
    #[instrument(skip_all, fields(session_id, family_id))]
    pub async fn refresh(&self, refresh_token: &str) -> SecurityResult<TokenPair> {
        let claims = self.jwt.decode_as(refresh_token, TokenType::Refresh)?;
        let Some(family_id) = claims.fid else {
            return Err(SecurityError::token_invalid("refresh token carries no family"));
        };
        let span = tracing::Span::current();
        span.record("session_id", tracing::field::display(claims.sid));
        span.record("family_id", tracing::field::display(family_id));

        // Family ids never change, so the cached record is enough here.
        match self.sessions.get(claims.tid, claims.sid).await? {
            Some(session) if session.family_id != family_id => {
                warn!(expected = %session.family_id, "Refresh token family does not match session");
                return Err(SecurityError::token_invalid("refresh token family mismatch"));
            }
            Some(_) => {}
            None => return Err(SecurityError::SessionRevoked),
        }

        let now = OffsetDateTime::now_utc();
        let request = RotateRequest {
            session_id: claims.sid,
            presented_refresh_id: claims.jti,
            new_refresh_id: Uuid::new_v4(),
            new_access_id: Uuid::new_v4(),
            now,
            expires_at: now + to_time(self.refresh_ttl),
        };

        match self.sessions.rotate(&request).await? {
            RotateOutcome::Rotated(session) => {
                debug!(rotation_count = session.rotation_count, "Refresh token rotated");
                self.audit.record(
                    AuditEvent::builder("session.refreshed")
                        .tenant(session.tenant_id)
                        .actor(Actor::user(session.user_id))
                        .resource("session", session.id)
                        .build(),
                );
                self.mint(&session, &claims.caps)
            }
            RotateOutcome::Reused(session) => {
                self.handle_reuse(&session, claims.jti).await;
                Err(SecurityError::TokenReused)
            }
            RotateOutcome::Revoked(session) => {
                debug!(reason = ?session.revoke_reason, "Refresh on revoked session");
                Err(SecurityError::SessionRevoked)
            }
            RotateOutcome::Expired(_) => Err(SecurityError::TokenExpired),
            RotateOutcome::NotFound => Err(SecurityError::SessionRevoked),
        }
    }

    /// A consumed refresh token came back: revoke the family and raise the alarm.
    async fn handle_reuse(&self, session: &Session, presented_jti: Uuid) {
        let revoked = match self
            .sessions
            .revoke_family(session.tenant_id, session.family_id, RevokeReason::TokenReuse)
            .await
        {
            Ok(revoked) => revoked.len(),
            Err(e) => {
                error!(family_id = %session.family_id, error = %e, "Failed to revoke family after token reuse");
                0
            }
        };

        warn!(
            tenant_id = %session.tenant_id,
            user_id = %session.user_id,
            family_id = %session.family_id,
            presented_jti = %presented_jti,
            revoked,
            "Refresh token reuse detected, family revoked"
        );
        self.audit.record(
            AuditEvent::builder("token.reused")
                .tenant(session.tenant_id)
                .actor(Actor::user(session.user_id))
                .resource("session_family", session.family_id)
                .outcome(AuditOutcome::Denied)
                .details(json!({
                    "sessionId": session.id,
                    "presentedJti": presented_jti,
                    "revokedSessions": revoked,
                }))
                .build(),
        );
    }

    /// Validates an access token and checks that its session is still live.
    ///
    /// The session lookup goes through the cache and falls back to the
    /// durable store on a miss or cache error. A successful check counts as
    /// session activity and slides the session expiry, at most once per
    /// activity interval.
    pub async fn verify(&self, access_token: &str) -> SecurityResult<TokenClaims> {
        let claims = self.jwt.decode_as(access_token, TokenType::Access)?;
        let session = self
            .sessions
            .get(claims.tid, claims.sid)
            .await?
            .ok_or(SecurityError::SessionRevoked)?;

        if session.is_revoked() {
            return Err(SecurityError::SessionRevoked);
        }
        if session.is_expired_at(OffsetDateTime::now_utc()) {
            return Err(SecurityError::TokenExpired);
        }
        if let Err(e) = self.sessions.record_activity(&session, self.refresh_ttl).await {
            warn!(session_id = %session.id, error = %e, "Failed to record session activity");
        }
        Ok(claims)
    }

    /// Caller may manage `user_id`'s sessions: their own, or anyone's in the
    /// tenant with [`Capability::SessionAdmin`].
    fn ensure_can_manage(&self, ctx: &RequestContext, user_id: UserId) -> SecurityResult<()> {
        if ctx.user_id() == Some(user_id) || ctx.has_capability(Capability::SessionAdmin) {
            Ok(())
        } else {
            Err(SecurityError::not_found("session"))
        }
    }

    /// Revokes one session of the caller's tenant. Idempotent.
    pub async fn revoke_session(&self, ctx: &RequestContext, session_id: SessionId) -> SecurityResult<()> {
        let session = self
            .sessions
            .get(ctx.tenant_id(), session_id)
            .await?
            .ok_or_else(|| SecurityError::not_found("session"))?;
        self.ensure_can_manage(ctx, session.user_id)?;
        if session.is_revoked() {
            return Ok(());
        }

        let reason = if ctx.session_id() == Some(session_id) {
            RevokeReason::Logout
        } else {
            RevokeReason::Revoked
        };
        self.sessions.revoke(session_id, reason).await?;
        info!(session_id = %session_id, reason = reason.as_str(), "Session revoked");
        self.audit.record(
            AuditEvent::builder("session.revoked")
                .context(ctx)
                .resource("session", session_id)
                .details(json!({ "reason": reason.as_str(), "userId": session.user_id }))
                .build(),
        );
        Ok(())
    }

    /// Ends the caller's own session.
    pub async fn logout(&self, ctx: &RequestContext) -> SecurityResult<()> {
        let session_id = ctx
            .session_id()
            .ok_or_else(|| SecurityError::token_invalid("no session in context"))?;
        self.revoke_session(ctx, session_id).await
    }

    /// Revokes a whole refresh token family. Requires [`Capability::SessionAdmin`].
    /// Returns the number of sessions that were live.
    pub async fn revoke_family(&self, ctx: &RequestContext, family_id: FamilyId) -> SecurityResult<usize> {
        if !ctx.has_capability(Capability::SessionAdmin) {
            return Err(SecurityError::not_found("session family"));
        }
        let revoked = self
            .sessions
            .revoke_family(ctx.tenant_id(), family_id, RevokeReason::FamilyRevoked)
            .await?;
        info!(family_id = %family_id, revoked = revoked.len(), "Session family revoked");
        self.audit.record(
            AuditEvent::builder("session.revoked.family")
                .context(ctx)
                .resource("session_family", family_id)
                .details(json!({ "revokedSessions": revoked.len() }))
                .build(),
        );
        Ok(revoked.len())
    }

    /// Signs a user out everywhere in the caller's tenant.
    pub async fn revoke_all_for_user(&self, ctx: &RequestContext, user_id: UserId) -> SecurityResult<usize> {
        self.ensure_can_manage(ctx, user_id)?;
        let revoked = self
            .sessions
            .revoke_all_for_user(ctx.tenant_id(), user_id, RevokeReason::UserRevoked)
            .await?;
        info!(user_id = %user_id, revoked = revoked.len(), "All user sessions revoked");
        self.audit.record(
            AuditEvent::builder("session.revoked.user")
                .context(ctx)
                .resource("user", user_id)
                .details(json!({ "revokedSessions": revoked.len() }))
                .build(),
        );
        Ok(revoked.len())
    }

    /// Live sessions of a user in the caller's tenant.
    pub async fn list_sessions(&self, ctx: &RequestContext, user_id: UserId) -> SecurityResult<Vec<Session>> {
        self.ensure_can_manage(ctx, user_id)?;
        Ok(self
            .sessions
            .list_active_for_user(ctx.tenant_id(), user_id)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::jwt::SigningKeyPair;
    use aegis_audit::AuditConfig;
    use aegis_db_memory::{InMemoryAuditStorage, InMemoryCacheStore, InMemorySessionStorage};
    use aegis_storage::SessionStorage;

    struct Fixture {
        service: TokenService,
        sessions: Arc<InMemorySessionStorage>,
    }

    fn fixture() -> Fixture {
        let sessions = Arc::new(InMemorySessionStorage::new());
        let cache = Arc::new(InMemoryCacheStore::new());
        let audit = AuditPipeline::new(
            Arc::new(InMemoryAuditStorage::new()),
            None,
            AuditConfig::default(),
        );
        let config = AuthConfig::default();
        let jwt = JwtService::new(
            SigningKeyPair::from_secret(b"test-secret-test-secret-test-secret").unwrap(),
            config.issuer.clone(),
        );
        let store = SessionStore::new(sessions.clone(), cache, &SessionConfig::default());
        Fixture {
            service: TokenService::new(Arc::new(jwt), store, audit, &config),
            sessions,
        }
    }

    #[tokio::test]
    async fn test_issue_then_verify() {
        let f = fixture();
        let user = UserId::new();
        let tenant = TenantId::new();
        let pair = f.service.issue(user, tenant, DeviceInfo::default()).await.unwrap();

        let claims = f.service.verify(&pair.access_token).await.unwrap();
        assert_eq!(claims.tid, tenant);
        assert_eq!(claims.sid, pair.session_id);
        assert_eq!(claims.sub, user.to_string());

        let ctx = claims.to_context().unwrap();
        assert_eq!(ctx.user_id(), Some(user));
        assert_eq!(ctx.session_id(), Some(pair.session_id));
    }

    #[tokio::test]
    async fn test_tokens_are_not_interchangeable() {
        let f = fixture();
        let pair = f
            .service
            .issue(UserId::new(), TenantId::new(), DeviceInfo::default())
            .await
            .unwrap();
        assert!(matches!(
            f.service.verify(&pair.refresh_token).await,
            Err(SecurityError::TokenInvalid { .. })
        ));
        assert!(matches!(
            f.service.refresh(&pair.access_token).await,
            Err(SecurityError::TokenInvalid { .. })
        ));
    }

    #[tokio::test]
    async fn test_refresh_rotates_within_family() {
        let f = fixture();
        let first = f
            .service
            .issue(UserId::new(), TenantId::new(), DeviceInfo::default())
            .await
            .unwrap();
        let second = f.service.refresh(&first.refresh_token).await.unwrap();
        assert_eq!(second.session_id, first.session_id);
        assert_ne!(second.refresh_token, first.refresh_token);

        let stored = f.sessions.get(first.session_id).await.unwrap().unwrap();
        assert_eq!(stored.rotation_count, 1);
        assert!(f.service.verify(&second.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_capabilities_survive_refresh() {
        let f = fixture();
        let pair = f
            .service
            .issue_with_capabilities(
                UserId::new(),
                TenantId::new(),
                DeviceInfo::default(),
                &[Capability::SessionAdmin],
            )
            .await
            .unwrap();
        let next = f.service.refresh(&pair.refresh_token).await.unwrap();
        let ctx = f
            .service
            .verify(&next.access_token)
            .await
            .unwrap()
            .to_context()
            .unwrap();
        assert!(ctx.has_capability(Capability::SessionAdmin));
    }

    #[tokio::test]
    async fn test_verify_after_revoke() {
        let f = fixture();
        let user = UserId::new();
        let tenant = TenantId::new();
        let pair = f.service.issue(user, tenant, DeviceInfo::default()).await.unwrap();
        let ctx = f.service.verify(&pair.access_token).await.unwrap().to_context().unwrap();

        f.service.logout(&ctx).await.unwrap();
        f.service.logout(&ctx).await.unwrap();

        assert!(matches!(
            f.service.verify(&pair.access_token).await,
            Err(SecurityError::SessionRevoked)
        ));
        assert!(matches!(
            f.service.refresh(&pair.refresh_token).await,
            Err(SecurityError::SessionRevoked)
        ));
        let stored = f.sessions.get(pair.session_id).await.unwrap().unwrap();
        assert_eq!(stored.revoke_reason, Some(RevokeReason::Logout));
    }

    #[tokio::test]
    async fn test_other_users_sessions_hidden_without_capability() {
        let f = fixture();
        let tenant = TenantId::new();
        let victim = f.service.issue(UserId::new(), tenant, DeviceInfo::default()).await.unwrap();
        let attacker = RequestContext::new(tenant, Actor::user(UserId::new()));
        assert!(matches!(
            f.service.revoke_session(&attacker, victim.session_id).await,
            Err(SecurityError::NotFound { .. })
        ));

        let other_tenant_admin = RequestContext::new(TenantId::new(), Actor::user(UserId::new()))
            .with_capability(Capability::SessionAdmin);
        assert!(matches!(
            f.service
                .revoke_session(&other_tenant_admin, victim.session_id)
                .await,
            Err(SecurityError::NotFound { .. })
        ));

        let admin = attacker.with_capability(Capability::SessionAdmin);
        f.service.revoke_session(&admin, victim.session_id).await.unwrap();
        assert!(f.service.verify(&victim.access_token).await.is_err());
    }

    #[tokio::test]
    async fn test_revoke_all_for_user() {
        let f = fixture();
        let user = UserId::new();
        let tenant = TenantId::new();
        let a = f.service.issue(user, tenant, DeviceInfo::default()).await.unwrap();
        let b = f.service.issue(user, tenant, DeviceInfo::default()).await.unwrap();
        let ctx = RequestContext::new(tenant, Actor::user(user));

        assert_eq!(f.service.list_sessions(&ctx, user).await.unwrap().len(), 2);
        assert_eq!(f.service.revoke_all_for_user(&ctx, user).await.unwrap(), 2);
        assert_eq!(f.service.revoke_all_for_user(&ctx, user).await.unwrap(), 0);
        for pair in [a, b] {
            assert!(matches!(
                f.service.verify(&pair.access_token).await,
                Err(SecurityError::SessionRevoked)
            ));
        }
    }

    #[tokio::test]
    async fn test_refresh_with_foreign_family_is_invalid() {
        let f = fixture();
        let pair = f
            .service
            .issue(UserId::new(), TenantId::new(), DeviceInfo::default())
            .await
            .unwrap();
        let mut claims = f
            .service
            .jwt
            .decode_as(&pair.refresh_token, TokenType::Refresh)
            .unwrap();
        claims.fid = Some(FamilyId::new());
        let token = f.service.jwt.encode(&claims).unwrap();

        assert!(matches!(
            f.service.refresh(&token).await,
            Err(SecurityError::TokenInvalid { .. })
        ));
        let stored = f.sessions.get(pair.session_id).await.unwrap().unwrap();
        assert_eq!(stored.rotation_count, 0);
        assert!(stored.is_active());
    }

    #[tokio::test]
    async fn test_locked_account_cannot_sign_in() {
        let f = fixture();
        let lockout = LoginLockout::new(
            Arc::new(InMemoryCacheStore::new()),
            crate::config::LockoutConfig {
                max_attempts: 2,
                ..Default::default()
            },
        );
        let service = f.service.with_lockout(lockout);
        let tenant = TenantId::new();
        let user = UserId::new();

        assert_eq!(
            service.record_failed_login(tenant, user).await,
            LockStatus::Open { remaining_attempts: 1 }
        );
        assert!(service.record_failed_login(tenant, user).await.is_locked());
        assert!(matches!(
            service.issue(user, tenant, DeviceInfo::default()).await,
            Err(SecurityError::RateLimited { retry_after_secs }) if retry_after_secs > 0
        ));

        let other = UserId::new();
        service.record_failed_login(tenant, other).await;
        service.issue(other, tenant, DeviceInfo::default()).await.unwrap();
        assert_eq!(
            service.lockout().unwrap().status(tenant, &other.to_string()).await,
            LockStatus::Open { remaining_attempts: 2 }
        );
    }

    #[tokio::test]
    async fn test_durable_outage_fails_issue() {
        let f = fixture();
        f.sessions.outage().set(true);
        assert!(matches!(
            f.service
                .issue(UserId::new(), TenantId::new(), DeviceInfo::default())
                .await,
            Err(SecurityError::Internal { .. })
        ));
    }
}
