//! PostgreSQL session storage.

use std::sync::Arc;

use aegis_core::{DeviceInfo, FamilyId, RevokeReason, Session, SessionId, TenantId, UserId};
use aegis_storage::{RotateOutcome, RotateRequest, SessionStorage, StorageResult};
use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::row::Row;
use sqlx_postgres::{PgPool, PgRow};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::{corrupt, map_sqlx};

const COLUMNS: &str = "id, tenant_id, user_id, family_id, access_token_id, refresh_token_id, \
     device_fingerprint, ip_address, user_agent, created_at, last_activity_at, expires_at, \
     revoked_at, revoke_reason, rotation_count";

fn session_from_row(row: &PgRow) -> StorageResult<Session> {
    let revoke_reason = row
        .try_get::<Option<String>, _>("revoke_reason")
        .map_err(map_sqlx)?
        .map(|r| RevokeReason::parse(&r).ok_or_else(|| corrupt("revoke_reason", &r)))
        .transpose()?;

    Ok(Session {
        id: SessionId::from_uuid(row.try_get("id").map_err(map_sqlx)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(map_sqlx)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(map_sqlx)?),
        family_id: FamilyId::from_uuid(row.try_get("family_id").map_err(map_sqlx)?),
        access_token_id: row.try_get("access_token_id").map_err(map_sqlx)?,
        refresh_token_id: row.try_get("refresh_token_id").map_err(map_sqlx)?,
        device: DeviceInfo {
            fingerprint: row.try_get("device_fingerprint").map_err(map_sqlx)?,
            ip_address: row.try_get("ip_address").map_err(map_sqlx)?,
            user_agent: row.try_get("user_agent").map_err(map_sqlx)?,
        },
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        last_activity_at: row.try_get("last_activity_at").map_err(map_sqlx)?,
        expires_at: row.try_get("expires_at").map_err(map_sqlx)?,
        revoked_at: row.try_get("revoked_at").map_err(map_sqlx)?,
        revoke_reason,
        rotation_count: row.try_get("rotation_count").map_err(map_sqlx)?,
    })
}

fn sessions_from_rows(rows: &[PgRow]) -> StorageResult<Vec<Session>> {
    rows.iter().map(session_from_row).collect()
}

/// Arc-owning PostgreSQL session storage.
#[derive(Clone)]
pub struct PostgresSessionStorage {
    pool: Arc<PgPool>,
}

impl PostgresSessionStorage {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStorage for PostgresSessionStorage {
    async fn create(&self, session: &Session) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO sessions ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        );
        query(&sql)
            .bind(session.id.as_uuid())
            .bind(session.tenant_id.as_uuid())
            .bind(session.user_id.as_uuid())
            .bind(session.family_id.as_uuid())
            .bind(session.access_token_id)
            .bind(session.refresh_token_id)
            .bind(&session.device.fingerprint)
            .bind(&session.device.ip_address)
            .bind(&session.device.user_agent)
            .bind(session.created_at)
            .bind(session.last_activity_at)
            .bind(session.expires_at)
            .bind(session.revoked_at)
            .bind(session.revoke_reason.map(|r| r.as_str()))
            .bind(session.rotation_count)
            .execute(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get(&self, id: SessionId) -> StorageResult<Option<Session>> {
        let sql = format!("SELECT {COLUMNS} FROM sessions WHERE id = $1");
        let row = query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn list_active_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        now: OffsetDateTime,
    ) -> StorageResult<Vec<Session>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM sessions \
             WHERE tenant_id = $1 AND user_id = $2 AND revoked_at IS NULL AND expires_at > $3 \
             ORDER BY last_activity_at DESC"
        );
        let rows = query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(user_id.as_uuid())
            .bind(now)
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        sessions_from_rows(&rows)
    }

    async fn rotate(&self, request: &RotateRequest) -> StorageResult<RotateOutcome> {
        // The WHERE clause is the reuse check: a concurrent rotation that
        // commits first changes refresh_token_id, and the row lock makes this
        // statement re-evaluate against the committed value.
        let sql = format!(
            "UPDATE sessions \
             SET refresh_token_id = $3, access_token_id = $4, last_activity_at = $5, \
                 expires_at = $6, rotation_count = rotation_count + 1 \
             WHERE id = $1 AND refresh_token_id = $2 \
               AND revoked_at IS NULL AND expires_at > $5 \
             RETURNING {COLUMNS}"
        );
        let updated = query(&sql)
            .bind(request.session_id.as_uuid())
            .bind(request.presented_refresh_id)
            .bind(request.new_refresh_id)
            .bind(request.new_access_id)
            .bind(request.now)
            .bind(request.expires_at)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;

        if let Some(row) = updated {
            return Ok(RotateOutcome::Rotated(session_from_row(&row)?));
        }

        let Some(current) = self.get(request.session_id).await? else {
            return Ok(RotateOutcome::NotFound);
        };
        debug!(session_id = %current.id, "Rotation precondition failed");
        Ok(if current.is_revoked() {
            RotateOutcome::Revoked(current)
        } else if current.is_expired_at(request.now) {
            RotateOutcome::Expired(current)
        } else {
            RotateOutcome::Reused(current)
        })
    }

    async fn extend(
        &self,
        id: SessionId,
        expires_at: OffsetDateTime,
        last_activity_at: OffsetDateTime,
    ) -> StorageResult<Option<Session>> {
        let sql = format!(
            "UPDATE sessions SET expires_at = $2, last_activity_at = $3 \
             WHERE id = $1 AND revoked_at IS NULL AND expires_at > $3 \
             RETURNING {COLUMNS}"
        );
        let row = query(&sql)
            .bind(id.as_uuid())
            .bind(expires_at)
            .bind(last_activity_at)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn revoke(
        &self,
        id: SessionId,
        reason: RevokeReason,
        at: OffsetDateTime,
    ) -> StorageResult<Option<Session>> {
        let sql = format!(
            "UPDATE sessions \
             SET revoked_at = COALESCE(revoked_at, $2), \
                 revoke_reason = COALESCE(revoke_reason, $3) \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let row = query(&sql)
            .bind(id.as_uuid())
            .bind(at)
            .bind(reason.as_str())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn revoke_family(
        &self,
        tenant_id: TenantId,
        family_id: FamilyId,
        reason: RevokeReason,
        at: OffsetDateTime,
    ) -> StorageResult<Vec<Session>> {
        let sql = format!(
            "UPDATE sessions SET revoked_at = $3, revoke_reason = $4 \
             WHERE tenant_id = $1 AND family_id = $2 AND revoked_at IS NULL \
             RETURNING {COLUMNS}"
        );
        let rows = query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(family_id.as_uuid())
            .bind(at)
            .bind(reason.as_str())
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        sessions_from_rows(&rows)
    }

    async fn revoke_all_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        reason: RevokeReason,
        at: OffsetDateTime,
    ) -> StorageResult<Vec<Session>> {
        let sql = format!(
            "UPDATE sessions SET revoked_at = $3, revoke_reason = $4 \
             WHERE tenant_id = $1 AND user_id = $2 AND revoked_at IS NULL \
             RETURNING {COLUMNS}"
        );
        let rows = query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(user_id.as_uuid())
            .bind(at)
            .bind(reason.as_str())
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        sessions_from_rows(&rows)
    }

    async fn purge_expired(&self, cutoff: OffsetDateTime) -> StorageResult<u64> {
        let result = query("DELETE FROM sessions WHERE expires_at < $1 OR revoked_at < $1")
            .bind(cutoff)
            .execute(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }
}
