use std::cmp::Reverse;
use std::collections::HashMap;

use aegis_core::{Job, JobId, JobStatus};
use aegis_storage::{JobStats, JobStorage, StorageError, StorageResult};
use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::outage::OutageSwitch;

/// Job queue storage behind one mutex, so claims are trivially exclusive.
#[derive(Debug, Default)]
pub struct InMemoryJobStorage {
    jobs: Mutex<HashMap<JobId, Job>>,
    outage: OutageSwitch,
}

impl InMemoryJobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outage(&self) -> &OutageSwitch {
        &self.outage
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

fn holds_lease(job: &Job, worker: &str) -> bool {
    job.status == JobStatus::Processing && job.lease_owner.as_deref() == Some(worker)
}

#[async_trait]
impl JobStorage for InMemoryJobStorage {
    async fn insert(&self, job: &Job) -> StorageResult<()> {
        self.outage.check("job store")?;
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(StorageError::conflict(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> StorageResult<Option<Job>> {
        self.outage.check("job store")?;
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn claim_due(
        &self,
        worker: &str,
        now: OffsetDateTime,
        lease: Duration,
    ) -> StorageResult<Option<Job>> {
        self.outage.check("job store")?;
        let mut jobs = self.jobs.lock().await;
        let next = jobs
            .values()
            .filter(|job| job.is_claimable_at(now))
            .min_by_key(|job| (job.scheduled_at, Reverse(job.priority)))
            .map(|job| job.id);
        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.status = JobStatus::Processing;
        job.lease_owner = Some(worker.to_string());
        job.lease_expires_at = Some(now + lease);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn complete(&self, id: JobId, worker: &str) -> StorageResult<bool> {
        self.outage.check("job store")?;
        let mut jobs = self.jobs.lock().await;
        if !jobs.get(&id).is_some_and(|job| holds_lease(job, worker)) {
            return Ok(false);
        }
        Ok(jobs.remove(&id).is_some())
    }

    async fn reschedule(
        &self,
        id: JobId,
        worker: &str,
        attempts: i32,
        scheduled_at: OffsetDateTime,
        last_error: &str,
    ) -> StorageResult<bool> {
        self.outage.check("job store")?;
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id).filter(|job| holds_lease(job, worker)) else {
            return Ok(false);
        };
        job.status = JobStatus::Scheduled;
        job.attempts = attempts;
        job.scheduled_at = scheduled_at;
        job.last_error = Some(last_error.to_string());
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn dead_letter(
        &self,
        id: JobId,
        worker: &str,
        attempts: i32,
        last_error: &str,
    ) -> StorageResult<bool> {
        self.outage.check("job store")?;
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id).filter(|job| holds_lease(job, worker)) else {
            return Ok(false);
        };
        job.status = JobStatus::DeadLettered;
        job.attempts = attempts;
        job.last_error = Some(last_error.to_string());
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn list_dead_letters(&self, limit: u32) -> StorageResult<Vec<Job>> {
        self.outage.check("job store")?;
        let jobs = self.jobs.lock().await;
        let mut dead: Vec<Job> = jobs
            .values()
            .filter(|job| job.status == JobStatus::DeadLettered)
            .cloned()
            .collect();
        dead.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        dead.truncate(limit as usize);
        Ok(dead)
    }

    async fn requeue_dead_letter(&self, id: JobId, now: OffsetDateTime) -> StorageResult<bool> {
        self.outage.check("job store")?;
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::DeadLettered => {
                job.status = JobStatus::Scheduled;
                job.attempts = 0;
                job.scheduled_at = now;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stats(&self) -> StorageResult<JobStats> {
        self.outage.check("job store")?;
        let jobs = self.jobs.lock().await;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Scheduled => stats.scheduled += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::DeadLettered => stats.dead_lettered += 1,
            }
        }
        Ok(stats)
    }
}
