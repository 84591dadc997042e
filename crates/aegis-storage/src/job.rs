//! Durable job queue storage.

use aegis_core::{Job, JobId};
use async_trait::async_trait;
use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::error::StorageResult;

/// Queue depth by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub scheduled: u64,
    pub processing: u64,
    pub dead_lettered: u64,
}

/// Storage backing the job queue.
///
/// Workers coordinate only through the lease taken by
/// [`claim_due`](Self::claim_due): a job is handed to at most one worker per
/// lease. A worker that crashes mid-job simply lets its lease lapse and the
/// job becomes claimable again, which is what makes delivery at-least-once.
///
/// [`complete`](Self::complete), [`reschedule`](Self::reschedule) and
/// [`dead_letter`](Self::dead_letter) apply only while `worker` still owns
/// the lease of a processing job. They return `false` otherwise, so a worker
/// whose lease was taken over cannot touch the job again.
#[async_trait]
pub trait JobStorage: Send + Sync {
    async fn insert(&self, job: &Job) -> StorageResult<()>;

    async fn get(&self, id: JobId) -> StorageResult<Option<Job>>;

    /// Atomically claims one job for `worker`.
    ///
    /// Candidates are scheduled jobs with `scheduled_at <= now` and
    /// processing jobs whose lease expired before `now`. The earliest
    /// scheduled candidate wins, higher priority breaking ties. The claimed
    /// job is moved to `processing` with `lease_expires_at = now + lease`.
    async fn claim_due(
        &self,
        worker: &str,
        now: OffsetDateTime,
        lease: Duration,
    ) -> StorageResult<Option<Job>>;

    /// Removes a finished job.
    async fn complete(&self, id: JobId, worker: &str) -> StorageResult<bool>;

    /// Returns a failed job to `scheduled` with a new attempt count and due time.
    async fn reschedule(
        &self,
        id: JobId,
        worker: &str,
        attempts: i32,
        scheduled_at: OffsetDateTime,
        last_error: &str,
    ) -> StorageResult<bool>;

    /// Moves a job to the dead-letter list.
    async fn dead_letter(
        &self,
        id: JobId,
        worker: &str,
        attempts: i32,
        last_error: &str,
    ) -> StorageResult<bool>;

    /// Dead-lettered jobs, most recently failed first.
    async fn list_dead_letters(&self, limit: u32) -> StorageResult<Vec<Job>>;

    /// Puts a dead-lettered job back in the queue with a fresh attempt budget.
    async fn requeue_dead_letter(&self, id: JobId, now: OffsetDateTime) -> StorageResult<bool>;

    async fn stats(&self) -> StorageResult<JobStats>;
}
