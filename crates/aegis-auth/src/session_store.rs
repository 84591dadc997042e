//! Write-through cached access to session records.
//!
//! The durable store is the source of truth. Every write lands there first
//! and then refreshes the cached copy; cache failures are logged and never
//! fail the operation. Reads try the cache and fall back to the durable
//! store, repopulating the cache on a miss.
//!
//! Rotation goes straight to [`SessionStorage::rotate`]: the rotate/reuse
//! decision must see the authoritative record, so it never reads the cache.

use std::sync::Arc;
use std::time::Duration;

use aegis_core::{FamilyId, RevokeReason, Session, SessionId, TenantId, UserId};
use aegis_storage::{
    CacheKey, CacheStore, RotateOutcome, RotateRequest, SessionStorage, StorageResult, get_json,
    set_json,
};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;

#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn SessionStorage>,
    cache: Arc<dyn CacheStore>,
    cache_ttl: Duration,
    activity_interval: Duration,
}

impl SessionStore {
    pub fn new(
        storage: Arc<dyn SessionStorage>,
        cache: Arc<dyn CacheStore>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            storage,
            cache,
            cache_ttl: config.cache_ttl,
            activity_interval: config.activity_interval,
        }
    }

    /// Cached copies never outlive the session itself. Revoked records are
    /// kept for the full cache ttl so revocation is seen without a store hit.
    fn ttl_for(&self, session: &Session) -> Duration {
        if session.is_revoked() {
            return self.cache_ttl;
        }
        let remaining = session.expires_at - OffsetDateTime::now_utc();
        Duration::try_from(remaining)
            .unwrap_or(Duration::ZERO)
            .min(self.cache_ttl)
            .max(Duration::from_secs(1))
    }

    async fn cache_put(&self, session: &Session) {
        let key = CacheKey::session(session.tenant_id, session.id);
        if let Err(e) = set_json(self.cache.as_ref(), &key, session, Some(self.ttl_for(session))).await
        {
            warn!(session_id = %session.id, error = %e, "Failed to cache session");
        }
    }

    async fn cache_put_all(&self, sessions: &[Session]) {
        for session in sessions {
            self.cache_put(session).await;
        }
    }

    #[instrument(skip_all, fields(session_id = %session.id, tenant_id = %session.tenant_id))]
    pub async fn create(&self, session: &Session) -> StorageResult<()> {
        self.storage.create(session).await?;
        self.cache_put(session).await;
        debug!("Session created");
        Ok(())
    }

    /// Loads a session of `tenant_id`. A session of another tenant is
    /// reported as missing.
    pub async fn get(&self, tenant_id: TenantId, id: SessionId) -> StorageResult<Option<Session>> {
        let key = CacheKey::session(tenant_id, id);
        match get_json::<Session>(self.cache.as_ref(), &key).await {
            Ok(Some(session)) if session.tenant_id == tenant_id => return Ok(Some(session)),
            Ok(_) => {}
            Err(e) => warn!(session_id = %id, error = %e, "Session cache read failed, using durable store"),
        }

        let session = self
            .storage
            .get(id)
            .await?
            .filter(|s| s.tenant_id == tenant_id);
        if let Some(session) = &session {
            self.cache_put(session).await;
        }
        Ok(session)
    }

    /// Live sessions of a user, most recently active first.
    pub async fn list_active_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> StorageResult<Vec<Session>> {
        self.storage
            .list_active_for_user(tenant_id, user_id, OffsetDateTime::now_utc())
            .await
    }

    /// Atomic check-and-rotate against the durable store.
    pub async fn rotate(&self, request: &RotateRequest) -> StorageResult<RotateOutcome> {
        let outcome = self.storage.rotate(request).await?;
        if let RotateOutcome::Rotated(session) = &outcome {
            self.cache_put(session).await;
        }
        Ok(outcome)
    }

    /// Pushes the expiry to `now + ttl` without rotating tokens. Returns
    /// `None` if the session is missing, revoked, expired or belongs to
    /// another tenant.
    pub async fn extend(
        &self,
        tenant_id: TenantId,
        id: SessionId,
        ttl: Duration,
    ) -> StorageResult<Option<Session>> {
        if self.get(tenant_id, id).await?.is_none() {
            return Ok(None);
        }
        self.extend_now(id, ttl).await
    }

    /// Records request activity on `session`, extending it by `ttl`.
    ///
    /// Skipped while the last recorded activity is younger than the
    /// configured activity interval; returns `None` then.
    pub async fn record_activity(
        &self,
        session: &Session,
        ttl: Duration,
    ) -> StorageResult<Option<Session>> {
        let idle = OffsetDateTime::now_utc() - session.last_activity_at;
        if idle < time::Duration::try_from(self.activity_interval).unwrap_or(time::Duration::MAX) {
            return Ok(None);
        }
        let touched = self.extend_now(session.id, ttl).await?;
        if touched.is_some() {
            debug!(session_id = %session.id, "Session activity recorded");
        }
        Ok(touched)
    }

    async fn extend_now(&self, id: SessionId, ttl: Duration) -> StorageResult<Option<Session>> {
        let now = OffsetDateTime::now_utc();
        let expires_at = now + time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
        let extended = self.storage.extend(id, expires_at, now).await?;
        if let Some(session) = &extended {
            self.cache_put(session).await;
        }
        Ok(extended)
    }

    /// Revokes one session. Returns its current record.
    pub async fn revoke(&self, id: SessionId, reason: RevokeReason) -> StorageResult<Option<Session>> {
        let session = self
            .storage
            .revoke(id, reason, OffsetDateTime::now_utc())
            .await?;
        if let Some(session) = &session {
            self.cache_put(session).await;
        }
        Ok(session)
    }

    /// Revokes every live session of a family. Returns the newly revoked ones.
    pub async fn revoke_family(
        &self,
        tenant_id: TenantId,
        family_id: FamilyId,
        reason: RevokeReason,
    ) -> StorageResult<Vec<Session>> {
        let revoked = self
            .storage
            .revoke_family(tenant_id, family_id, reason, OffsetDateTime::now_utc())
            .await?;
        self.cache_put_all(&revoked).await;
        Ok(revoked)
    }

    pub async fn revoke_all_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        reason: RevokeReason,
    ) -> StorageResult<Vec<Session>> {
        let revoked = self
            .storage
            .revoke_all_for_user(tenant_id, user_id, reason, OffsetDateTime::now_utc())
            .await?;
        self.cache_put_all(&revoked).await;
        Ok(revoked)
    }

    /// Deletes sessions that expired or were revoked more than `grace` ago.
    /// Cached copies age out on their own ttl.
    pub async fn purge_expired(&self, grace: Duration) -> StorageResult<u64> {
        let cutoff =
            OffsetDateTime::now_utc() - time::Duration::try_from(grace).unwrap_or(time::Duration::ZERO);
        let purged = self.storage.purge_expired(cutoff).await?;
        if purged > 0 {
            info!(purged, "Purged expired sessions");
        }
        Ok(purged)
    }
}
