use std::collections::HashMap;

use aegis_core::{FamilyId, RevokeReason, Session, SessionId, TenantId, UserId};
use aegis_storage::{
    RotateOutcome, RotateRequest, SessionStorage, StorageError, StorageResult,
};
use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::outage::OutageSwitch;

/// Session storage held in a single `RwLock`ed map.
#[derive(Debug, Default)]
pub struct InMemorySessionStorage {
    sessions: RwLock<HashMap<SessionId, Session>>,
    outage: OutageSwitch,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outage(&self) -> &OutageSwitch {
        &self.outage
    }

    /// Total stored sessions, live or not.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn mark_revoked(session: &mut Session, reason: RevokeReason, at: OffsetDateTime) -> bool {
    if session.is_revoked() {
        return false;
    }
    session.revoked_at = Some(at);
    session.revoke_reason = Some(reason);
    true
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn create(&self, session: &Session) -> StorageResult<()> {
        self.outage.check("session store")?;
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StorageError::conflict(format!(
                "session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: SessionId) -> StorageResult<Option<Session>> {
        self.outage.check("session store")?;
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn list_active_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        now: OffsetDateTime,
    ) -> StorageResult<Vec<Session>> {
        self.outage.check("session store")?;
        let sessions = self.sessions.read().await;
        let mut active: Vec<Session> = sessions
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.user_id == user_id && s.is_active_at(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(active)
    }

    async fn rotate(&self, request: &RotateRequest) -> StorageResult<RotateOutcome> {
        self.outage.check("session store")?;
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&request.session_id) else {
            return Ok(RotateOutcome::NotFound);
        };
        if session.is_revoked() {
            return Ok(RotateOutcome::Revoked(session.clone()));
        }
        if session.is_expired_at(request.now) {
            return Ok(RotateOutcome::Expired(session.clone()));
        }
        if session.refresh_token_id != request.presented_refresh_id {
            return Ok(RotateOutcome::Reused(session.clone()));
        }
        session.refresh_token_id = request.new_refresh_id;
        session.access_token_id = request.new_access_id;
        session.last_activity_at = request.now;
        session.expires_at = request.expires_at;
        session.rotation_count += 1;
        Ok(RotateOutcome::Rotated(session.clone()))
    }

    async fn extend(
        &self,
        id: SessionId,
        expires_at: OffsetDateTime,
        last_activity_at: OffsetDateTime,
    ) -> StorageResult<Option<Session>> {
        self.outage.check("session store")?;
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(session) if session.is_active_at(last_activity_at) => {
                session.expires_at = expires_at;
                session.last_activity_at = last_activity_at;
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn revoke(
        &self,
        id: SessionId,
        reason: RevokeReason,
        at: OffsetDateTime,
    ) -> StorageResult<Option<Session>> {
        self.outage.check("session store")?;
        let mut sessions = self.sessions.write().await;
        Ok(sessions.get_mut(&id).map(|session| {
            mark_revoked(session, reason, at);
            session.clone()
        }))
    }

    async fn revoke_family(
        &self,
        tenant_id: TenantId,
        family_id: FamilyId,
        reason: RevokeReason,
        at: OffsetDateTime,
    ) -> StorageResult<Vec<Session>> {
        self.outage.check("session store")?;
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .values_mut()
            .filter(|s| s.tenant_id == tenant_id && s.family_id == family_id)
            .filter_map(|s| mark_revoked(s, reason, at).then(|| s.clone()))
            .collect())
    }

    async fn revoke_all_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        reason: RevokeReason,
        at: OffsetDateTime,
    ) -> StorageResult<Vec<Session>> {
        self.outage.check("session store")?;
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .values_mut()
            .filter(|s| s.tenant_id == tenant_id && s.user_id == user_id)
            .filter_map(|s| mark_revoked(s, reason, at).then(|| s.clone()))
            .collect())
    }

    async fn purge_expired(&self, cutoff: OffsetDateTime) -> StorageResult<u64> {
        self.outage.check("session store")?;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| {
            s.expires_at >= cutoff && s.revoked_at.is_none_or(|revoked| revoked >= cutoff)
        });
        Ok((before - sessions.len()) as u64)
    }
}
