//! Append-only audit log on PostgreSQL.
//!
//! Rows are never updated or deleted by this crate; the migration installs a
//! trigger that rejects both, so retention has to be handled by dropping
//! partitions or by a privileged maintenance role.

use std::sync::Arc;

use aegis_core::{Actor, ActorKind, AuditId, AuditLogEntry, AuditOutcome, TenantId};
use aegis_storage::{AuditQuery, AuditStorage, StorageResult};
use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_builder::QueryBuilder;
use sqlx_core::row::Row;
use sqlx_postgres::{PgPool, PgRow, Postgres};
use uuid::Uuid;

use crate::error::{corrupt, map_sqlx};

const COLUMNS: &str = "id, tenant_id, actor_kind, actor_id, action, resource_type, resource_id, \
     outcome, risk_score, compliance_flags, details, ip_address, user_agent, correlation_id, \
     occurred_at";

fn entry_from_row(row: &PgRow) -> StorageResult<AuditLogEntry> {
    let kind: String = row.try_get("actor_kind").map_err(map_sqlx)?;
    let outcome: String = row.try_get("outcome").map_err(map_sqlx)?;
    let tenant_id: Option<Uuid> = row.try_get("tenant_id").map_err(map_sqlx)?;
    let risk_score: Option<i16> = row.try_get("risk_score").map_err(map_sqlx)?;

    Ok(AuditLogEntry {
        id: AuditId::from_uuid(row.try_get("id").map_err(map_sqlx)?),
        tenant_id: tenant_id.map(TenantId::from_uuid),
        actor: Actor {
            kind: ActorKind::parse(&kind).ok_or_else(|| corrupt("actor_kind", &kind))?,
            id: row.try_get("actor_id").map_err(map_sqlx)?,
        },
        action: row.try_get("action").map_err(map_sqlx)?,
        resource_type: row.try_get("resource_type").map_err(map_sqlx)?,
        resource_id: row.try_get("resource_id").map_err(map_sqlx)?,
        outcome: AuditOutcome::parse(&outcome).ok_or_else(|| corrupt("outcome", &outcome))?,
        risk_score: risk_score.map(|s| s.clamp(0, 100) as u8),
        compliance_flags: row.try_get("compliance_flags").map_err(map_sqlx)?,
        details: row.try_get("details").map_err(map_sqlx)?,
        ip_address: row.try_get("ip_address").map_err(map_sqlx)?,
        user_agent: row.try_get("user_agent").map_err(map_sqlx)?,
        correlation_id: row.try_get("correlation_id").map_err(map_sqlx)?,
        occurred_at: row.try_get("occurred_at").map_err(map_sqlx)?,
    })
}

/// Appends `WHERE ...` for every set filter. Platform events (no tenant) are
/// only visible to cross-tenant queries.
fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, q: &AuditQuery) {
    builder.push(" WHERE TRUE");
    if let Some(tenant_id) = q.scope.tenant_id() {
        builder.push(" AND tenant_id = ").push_bind(tenant_id.as_uuid());
    }
    if let Some(actor_id) = &q.actor_id {
        builder.push(" AND actor_id = ").push_bind(actor_id.clone());
    }
    if let Some(action) = &q.action {
        builder.push(" AND action = ").push_bind(action.clone());
    }
    if let Some(resource_type) = &q.resource_type {
        builder
            .push(" AND resource_type = ")
            .push_bind(resource_type.clone());
    }
    if let Some(outcome) = q.outcome {
        builder.push(" AND outcome = ").push_bind(outcome.as_str());
    }
    if let Some(from) = q.from {
        builder.push(" AND occurred_at >= ").push_bind(from);
    }
    if let Some(to) = q.to {
        builder.push(" AND occurred_at < ").push_bind(to);
    }
}

#[derive(Clone)]
pub struct PostgresAuditStorage {
    pool: Arc<PgPool>,
}

impl PostgresAuditStorage {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStorage for PostgresAuditStorage {
    async fn append(&self, entry: &AuditLogEntry) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO audit_log ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        );
        query(&sql)
            .bind(entry.id.as_uuid())
            .bind(entry.tenant_id.map(|t| t.as_uuid()))
            .bind(entry.actor.kind.to_string())
            .bind(&entry.actor.id)
            .bind(&entry.action)
            .bind(&entry.resource_type)
            .bind(&entry.resource_id)
            .bind(entry.outcome.as_str())
            .bind(entry.risk_score.map(i16::from))
            .bind(&entry.compliance_flags)
            .bind(&entry.details)
            .bind(&entry.ip_address)
            .bind(&entry.user_agent)
            .bind(&entry.correlation_id)
            .bind(entry.occurred_at)
            .execute(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn query(&self, q: &AuditQuery) -> StorageResult<Vec<AuditLogEntry>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM audit_log"));
        push_filters(&mut builder, q);
        builder.push(" ORDER BY occurred_at DESC, id DESC LIMIT ");
        builder.push_bind(i64::from(q.limit));
        builder.push(" OFFSET ").push_bind(i64::from(q.offset));

        let rows = builder
            .build()
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn count(&self, q: &AuditQuery) -> StorageResult<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM audit_log");
        push_filters(&mut builder, q);

        let row = builder
            .build()
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        let total: i64 = row.try_get("total").map_err(map_sqlx)?;
        Ok(total.max(0) as u64)
    }
}
