use std::sync::Arc;

use aegis_core::{IsolationMode, Tenant, TenantId, TenantRouting, TenantStatus, TenantTier};
use aegis_storage::{StorageError, StorageResult, TenantStorage};
use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::row::Row;
use sqlx_postgres::{PgPool, PgRow};

use crate::error::{corrupt, map_sqlx};

const COLUMNS: &str = "id, name, tier, isolation_mode, routing, status, created_at, updated_at";

fn tenant_from_row(row: &PgRow) -> StorageResult<Tenant> {
    let tier: String = row.try_get("tier").map_err(map_sqlx)?;
    let mode: String = row.try_get("isolation_mode").map_err(map_sqlx)?;
    let status: String = row.try_get("status").map_err(map_sqlx)?;
    let routing: serde_json::Value = row.try_get("routing").map_err(map_sqlx)?;

    Ok(Tenant {
        id: TenantId::from_uuid(row.try_get("id").map_err(map_sqlx)?),
        name: row.try_get("name").map_err(map_sqlx)?,
        tier: TenantTier::parse(&tier).ok_or_else(|| corrupt("tier", &tier))?,
        isolation_mode: IsolationMode::parse(&mode)
            .ok_or_else(|| corrupt("isolation_mode", &mode))?,
        routing: serde_json::from_value::<TenantRouting>(routing)?,
        status: TenantStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx)?,
    })
}

/// Arc-owning PostgreSQL tenant storage.
#[derive(Clone)]
pub struct PostgresTenantStorage {
    pool: Arc<PgPool>,
}

impl PostgresTenantStorage {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantStorage for PostgresTenantStorage {
    async fn create(&self, tenant: &Tenant) -> StorageResult<()> {
        let sql = format!("INSERT INTO tenants ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)");
        query(&sql)
            .bind(tenant.id.as_uuid())
            .bind(&tenant.name)
            .bind(tenant.tier.as_str())
            .bind(tenant.isolation_mode.as_str())
            .bind(serde_json::to_value(&tenant.routing)?)
            .bind(tenant.status.as_str())
            .bind(tenant.created_at)
            .bind(tenant.updated_at)
            .execute(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get(&self, id: TenantId) -> StorageResult<Option<Tenant>> {
        let sql = format!("SELECT {COLUMNS} FROM tenants WHERE id = $1");
        let row = query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn update(&self, tenant: &Tenant) -> StorageResult<()> {
        let result = query(
            r#"
            UPDATE tenants
            SET name = $2, tier = $3, isolation_mode = $4, routing = $5, status = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(tenant.id.as_uuid())
        .bind(&tenant.name)
        .bind(tenant.tier.as_str())
        .bind(tenant.isolation_mode.as_str())
        .bind(serde_json::to_value(&tenant.routing)?)
        .bind(tenant.status.as_str())
        .bind(tenant.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(format!("tenant {}", tenant.id)));
        }
        Ok(())
    }

    async fn list(&self, limit: u32, offset: u32) -> StorageResult<Vec<Tenant>> {
        let sql = format!("SELECT {COLUMNS} FROM tenants ORDER BY created_at, name LIMIT $1 OFFSET $2");
        let rows = query(&sql)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(tenant_from_row).collect()
    }
}
