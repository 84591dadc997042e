//! Durable job queue on PostgreSQL.

use std::sync::Arc;

use aegis_core::{Job, JobId, JobStatus, TenantId};
use aegis_storage::{JobStats, JobStorage, StorageResult};
use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::row::Row;
use sqlx_postgres::{PgPool, PgRow};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::error::{corrupt, map_sqlx};

const COLUMNS: &str = "id, job_type, payload, priority, attempts, max_attempts, status, \
     scheduled_at, lease_owner, lease_expires_at, last_error, tenant_id, created_at, updated_at";

fn job_from_row(row: &PgRow) -> StorageResult<Job> {
    let status: String = row.try_get("status").map_err(map_sqlx)?;
    let tenant_id: Option<Uuid> = row.try_get("tenant_id").map_err(map_sqlx)?;

    Ok(Job {
        id: JobId::from_uuid(row.try_get("id").map_err(map_sqlx)?),
        job_type: row.try_get("job_type").map_err(map_sqlx)?,
        payload: row.try_get("payload").map_err(map_sqlx)?,
        priority: row.try_get("priority").map_err(map_sqlx)?,
        attempts: row.try_get("attempts").map_err(map_sqlx)?,
        max_attempts: row.try_get("max_attempts").map_err(map_sqlx)?,
        status: JobStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        scheduled_at: row.try_get("scheduled_at").map_err(map_sqlx)?,
        lease_owner: row.try_get("lease_owner").map_err(map_sqlx)?,
        lease_expires_at: row.try_get("lease_expires_at").map_err(map_sqlx)?,
        last_error: row.try_get("last_error").map_err(map_sqlx)?,
        tenant_id: tenant_id.map(TenantId::from_uuid),
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx)?,
    })
}

/// Arc-owning PostgreSQL job storage.
///
/// Claims use `FOR UPDATE SKIP LOCKED`, so any number of worker processes can
/// poll the same table without blocking on each other.
#[derive(Clone)]
pub struct PostgresJobStorage {
    pool: Arc<PgPool>,
}

impl PostgresJobStorage {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStorage for PostgresJobStorage {
    async fn insert(&self, job: &Job) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO jobs ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        );
        query(&sql)
            .bind(job.id.as_uuid())
            .bind(&job.job_type)
            .bind(&job.payload)
            .bind(job.priority)
            .bind(job.attempts)
            .bind(job.max_attempts)
            .bind(job.status.as_str())
            .bind(job.scheduled_at)
            .bind(&job.lease_owner)
            .bind(job.lease_expires_at)
            .bind(&job.last_error)
            .bind(job.tenant_id.map(|t| t.as_uuid()))
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> StorageResult<Option<Job>> {
        let sql = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let row = query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn claim_due(
        &self,
        worker: &str,
        now: OffsetDateTime,
        lease: Duration,
    ) -> StorageResult<Option<Job>> {
        let sql = format!(
            "UPDATE jobs \
             SET status = 'processing', lease_owner = $1, lease_expires_at = $3, updated_at = $2 \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE (status = 'scheduled' AND scheduled_at <= $2) \
                    OR (status = 'processing' AND lease_expires_at <= $2) \
                 ORDER BY scheduled_at, priority DESC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let row = query(&sql)
            .bind(worker)
            .bind(now)
            .bind(now + lease)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;

        let job = row.as_ref().map(job_from_row).transpose()?;
        if let Some(job) = &job {
            debug!(job_id = %job.id, job_type = %job.job_type, worker, "Claimed job");
        }
        Ok(job)
    }

    async fn complete(&self, id: JobId, worker: &str) -> StorageResult<bool> {
        let result = query(
            "DELETE FROM jobs WHERE id = $1 AND status = 'processing' AND lease_owner = $2",
        )
        .bind(id.as_uuid())
        .bind(worker)
        .execute(self.pool.as_ref())
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn reschedule(
        &self,
        id: JobId,
        worker: &str,
        attempts: i32,
        scheduled_at: OffsetDateTime,
        last_error: &str,
    ) -> StorageResult<bool> {
        let result = query(
            r#"
            UPDATE jobs
            SET status = 'scheduled', attempts = $2, scheduled_at = $3, last_error = $4,
                lease_owner = NULL, lease_expires_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND lease_owner = $5
            "#,
        )
        .bind(id.as_uuid())
        .bind(attempts)
        .bind(scheduled_at)
        .bind(last_error)
        .bind(worker)
        .execute(self.pool.as_ref())
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn dead_letter(
        &self,
        id: JobId,
        worker: &str,
        attempts: i32,
        last_error: &str,
    ) -> StorageResult<bool> {
        let result = query(
            r#"
            UPDATE jobs
            SET status = 'dead_lettered', attempts = $2, last_error = $3,
                lease_owner = NULL, lease_expires_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND lease_owner = $4
            "#,
        )
        .bind(id.as_uuid())
        .bind(attempts)
        .bind(last_error)
        .bind(worker)
        .execute(self.pool.as_ref())
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_dead_letters(&self, limit: u32) -> StorageResult<Vec<Job>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM jobs WHERE status = 'dead_lettered' \
             ORDER BY updated_at DESC LIMIT $1"
        );
        let rows = query(&sql)
            .bind(i64::from(limit))
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(job_from_row).collect()
    }

    async fn requeue_dead_letter(&self, id: JobId, now: OffsetDateTime) -> StorageResult<bool> {
        let result = query(
            r#"
            UPDATE jobs
            SET status = 'scheduled', attempts = 0, scheduled_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'dead_lettered'
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .execute(self.pool.as_ref())
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> StorageResult<JobStats> {
        let rows = query("SELECT status, COUNT(*) AS total FROM jobs GROUP BY status")
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;

        let mut stats = JobStats::default();
        for row in &rows {
            let status: String = row.try_get("status").map_err(map_sqlx)?;
            let total: i64 = row.try_get("total").map_err(map_sqlx)?;
            let total = total.max(0) as u64;
            match JobStatus::parse(&status) {
                Some(JobStatus::Scheduled) => stats.scheduled = total,
                Some(JobStatus::Processing) => stats.processing = total,
                Some(JobStatus::DeadLettered) => stats.dead_lettered = total,
                None => return Err(corrupt("status", &status)),
            }
        }
        Ok(stats)
    }
}
