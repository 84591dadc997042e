//! The job queue contract: `enqueue`, `claim`, `complete`, `fail`.

use std::sync::Arc;
use std::time::Duration;

use aegis_core::{Job, JobId, JobStatus, NewJob, SecurityError, TenantId};
use aegis_storage::{JobStats, JobStorage};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::BackoffPolicy;
use crate::config::JobsConfig;
use crate::error::JobError;

/// Options for [`JobQueue::enqueue`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Higher runs first among jobs due at the same time.
    pub priority: i16,
    /// Delay before the first attempt.
    pub delay: Duration,
    /// Overrides the queue default.
    pub max_attempts: Option<i32>,
    pub tenant_id: Option<TenantId>,
}

impl EnqueueOptions {
    pub fn priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }
}

/// What [`JobQueue::fail`] did with the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Rescheduled after `delay`.
    Retried {
        attempts: i32,
        delay: Duration,
        next_run_at: OffsetDateTime,
    },
    /// Out of attempts; moved to the dead-letter list.
    DeadLettered { attempts: i32 },
    /// The worker no longer holds the lease; the job was left untouched.
    LeaseLost,
}

fn to_time(d: Duration) -> time::Duration {
    time::Duration::try_from(d).unwrap_or(time::Duration::MAX)
}

/// Durable queue of background jobs.
///
/// The contract is independent of how jobs are stored: the PostgreSQL
/// backend polls a table with leases, the in-memory one a map.
#[derive(Clone)]
pub struct JobQueue {
    storage: Arc<dyn JobStorage>,
    backoff: BackoffPolicy,
    default_max_attempts: i32,
    lease: Duration,
}

impl JobQueue {
    pub fn new(storage: Arc<dyn JobStorage>, config: &JobsConfig) -> Self {
        Self {
            storage,
            backoff: BackoffPolicy::new(config.backoff_base, config.max_backoff),
            default_max_attempts: config.default_max_attempts.max(1),
            lease: config.lease,
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Stores a job due after `options.delay` and returns its id.
    #[instrument(skip(self, payload, options))]
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<JobId, JobError> {
        let job = NewJob {
            id: JobId::new(),
            job_type: job_type.to_string(),
            payload,
            priority: options.priority,
            max_attempts: options.max_attempts.unwrap_or(self.default_max_attempts).max(1),
            scheduled_at: OffsetDateTime::now_utc() + to_time(options.delay),
            tenant_id: options.tenant_id,
        }
        .into_job();

        self.storage.insert(&job).await?;
        debug!(job_id = %job.id, job_type, "Job enqueued");
        Ok(job.id)
    }

    /// Claims the next due job (or one whose lease lapsed) for `worker`.
    pub async fn claim(&self, worker: &str) -> Result<Option<Job>, JobError> {
        let job = self
            .storage
            .claim_due(worker, OffsetDateTime::now_utc(), to_time(self.lease))
            .await?;
        Ok(job)
    }

    /// Removes a delivered job. Returns `false` if `worker` lost the lease,
    /// which happens when another worker reclaimed the job after this one's
    /// lease lapsed.
    pub async fn complete(&self, id: JobId, worker: &str) -> Result<bool, JobError> {
        let removed = self.storage.complete(id, worker).await?;
        if !removed {
            warn!(job_id = %id, worker, "Lease lost before completion");
        }
        Ok(removed)
    }

    /// Records a failed attempt by the lease holder `worker`.
    ///
    /// Increments the attempt count; below `max_attempts` the job is
    /// rescheduled with backoff, otherwise it is dead-lettered. Nothing
    /// changes when `worker` no longer holds the lease.
    #[instrument(skip(self, reason))]
    pub async fn fail(
        &self,
        id: JobId,
        worker: &str,
        reason: &str,
    ) -> Result<FailOutcome, JobError> {
        let job = self.leased_job(id, worker).await?;
        let Some(job) = job else {
            return Ok(FailOutcome::LeaseLost);
        };

        let attempts = job.attempts.saturating_add(1);
        if attempts >= job.max_attempts {
            return self.move_to_dead_letter(&job, worker, attempts, reason).await;
        }

        let delay = self
            .backoff
            .jittered(u32::try_from(job.attempts).unwrap_or(0));
        let next_run_at = OffsetDateTime::now_utc() + to_time(delay);
        if !self
            .storage
            .reschedule(id, worker, attempts, next_run_at, reason)
            .await?
        {
            warn!(job_id = %id, worker, "Lease lost before reschedule");
            return Ok(FailOutcome::LeaseLost);
        }

        warn!(
            job_id = %id,
            job_type = %job.job_type,
            attempts,
            max_attempts = job.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %reason,
            "Job failed, retrying"
        );
        Ok(FailOutcome::Retried {
            attempts,
            delay,
            next_run_at,
        })
    }

    /// Dead-letters a job whose failure cannot be fixed by retrying.
    pub async fn fail_permanently(
        &self,
        id: JobId,
        worker: &str,
        reason: &str,
    ) -> Result<FailOutcome, JobError> {
        match self.leased_job(id, worker).await? {
            Some(job) => {
                self.move_to_dead_letter(&job, worker, job.attempts.saturating_add(1), reason)
                    .await
            }
            None => Ok(FailOutcome::LeaseLost),
        }
    }

    /// The job if `worker` holds its lease, `None` if someone else does.
    async fn leased_job(&self, id: JobId, worker: &str) -> Result<Option<Job>, JobError> {
        let job = self
            .storage
            .get(id)
            .await?
            .ok_or(JobError::NotFound { job_id: id })?;
        if job.status == JobStatus::Processing && job.lease_owner.as_deref() == Some(worker) {
            Ok(Some(job))
        } else {
            warn!(
                job_id = %id,
                worker,
                lease_owner = job.lease_owner.as_deref().unwrap_or("none"),
                "Lease lost, discarding job result"
            );
            Ok(None)
        }
    }

    async fn move_to_dead_letter(
        &self,
        job: &Job,
        worker: &str,
        attempts: i32,
        reason: &str,
    ) -> Result<FailOutcome, JobError> {
        if !self
            .storage
            .dead_letter(job.id, worker, attempts, reason)
            .await?
        {
            warn!(job_id = %job.id, worker, "Lease lost before dead-lettering");
            return Ok(FailOutcome::LeaseLost);
        }
        let err = SecurityError::JobDeadLettered { job_id: job.id };
        error!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempts,
            error = %reason,
            "{err}"
        );
        Ok(FailOutcome::DeadLettered { attempts })
    }

    pub async fn dead_letters(&self, limit: u32) -> Result<Vec<Job>, JobError> {
        Ok(self.storage.list_dead_letters(limit).await?)
    }

    /// Puts a dead-lettered job back in the queue with its attempts reset.
    pub async fn requeue(&self, id: JobId) -> Result<(), JobError> {
        if self
            .storage
            .requeue_dead_letter(id, OffsetDateTime::now_utc())
            .await?
        {
            info!(job_id = %id, "Dead-lettered job requeued");
            Ok(())
        } else if self.storage.get(id).await?.is_some() {
            Err(JobError::NotDeadLettered { job_id: id })
        } else {
            Err(JobError::NotFound { job_id: id })
        }
    }

    pub async fn stats(&self) -> Result<JobStats, JobError> {
        Ok(self.storage.stats().await?)
    }
}
