use std::sync::Arc;

use aegis_core::{AuditLogEntry, Job};
use aegis_jobs::{JobSender, SendOutcome};
use aegis_storage::{AuditStorage, StorageError};
use async_trait::async_trait;
use tracing::info;

pub const AUDIT_WRITE_JOB_TYPE: &str = "audit.write";

/// Writes audit entries deferred by [`crate::AuditPipeline`].
///
/// The job payload is the complete entry, id included, so a retry after a
/// write that actually committed hits a conflict and counts as delivered.
pub struct AuditWriteSender {
    storage: Arc<dyn AuditStorage>,
}

impl AuditWriteSender {
    pub fn new(storage: Arc<dyn AuditStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl JobSender for AuditWriteSender {
    fn job_type(&self) -> &str {
        AUDIT_WRITE_JOB_TYPE
    }

    async fn send(&self, job: &Job) -> SendOutcome {
        let entry: AuditLogEntry = match serde_json::from_value(job.payload.clone()) {
            Ok(entry) => entry,
            Err(e) => return SendOutcome::permanent(format!("invalid audit entry: {e}")),
        };

        match self.storage.append(&entry).await {
            Ok(()) => {
                info!(audit_id = %entry.id, job_id = %job.id, "Deferred audit entry written");
                SendOutcome::Delivered
            }
            Err(StorageError::Conflict(_)) => SendOutcome::Delivered,
            Err(e) => SendOutcome::retryable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AuditConfig, AuditPipeline, WriteOutcome};
    use aegis_core::{AuditEvent, JobId, NewJob};
    use aegis_db_memory::{InMemoryAuditStorage, InMemoryJobStorage};
    use aegis_jobs::{JobQueue, JobWorker, JobsConfig, RunReport};
    use std::time::Duration;

    #[tokio::test]
    async fn test_deferred_entry_written_after_recovery() {
        let audit = Arc::new(InMemoryAuditStorage::new());
        let jobs = Arc::new(InMemoryJobStorage::new());
        let config = JobsConfig {
            backoff_base: Duration::from_millis(20),
            ..JobsConfig::default()
        };
        let queue = JobQueue::new(jobs, &config);
        let pipeline = AuditPipeline::new(audit.clone(), Some(queue.clone()), AuditConfig::default());

        audit.outage().set(true);
        let outcome = pipeline
            .write(AuditEvent::builder("token.reused").build())
            .await;
        let WriteOutcome::Deferred(job_id) = outcome else {
            panic!("expected deferral");
        };

        let worker = JobWorker::new("w1", queue, Duration::from_millis(10))
            .with_sender(Arc::new(AuditWriteSender::new(audit.clone())));

        assert_eq!(worker.run_once().await.unwrap(), RunReport::Retried(job_id));
        assert_eq!(audit.len().await, 0);

        audit.outage().set(false);
        let report = loop {
            match worker.run_once().await.unwrap() {
                RunReport::Idle => tokio::time::sleep(Duration::from_millis(10)).await,
                report => break report,
            }
        };
        assert_eq!(report, RunReport::Delivered(job_id));

        let entries = audit.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "token.reused");
        assert_eq!(entries[0].risk_score, Some(90));
    }

    #[tokio::test]
    async fn test_redelivered_job_writes_one_entry() {
        let audit = Arc::new(InMemoryAuditStorage::new());
        let sender = AuditWriteSender::new(audit.clone());
        let entry = AuditEvent::builder("session.revoked.family").build().into_entry();
        let job = NewJob {
            id: JobId::new(),
            job_type: AUDIT_WRITE_JOB_TYPE.to_string(),
            payload: serde_json::to_value(&entry).unwrap(),
            priority: 0,
            max_attempts: 5,
            scheduled_at: time::OffsetDateTime::now_utc(),
            tenant_id: None,
        }
        .into_job();

        assert_eq!(sender.send(&job).await, SendOutcome::Delivered);
        assert_eq!(sender.send(&job).await, SendOutcome::Delivered);

        let entries = audit.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, entry.id);
    }
}
