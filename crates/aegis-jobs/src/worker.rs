//! Polling worker that claims jobs and hands them to senders.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aegis_core::JobId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::JobError;
use crate::queue::{FailOutcome, JobQueue};
use crate::sender::{JobSender, SendOutcome};

/// What happened to the job handled by one [`JobWorker::run_once`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    Idle,
    Delivered(JobId),
    Retried(JobId),
    DeadLettered(JobId),
    /// Another worker took over the job before this one reported back.
    LeaseLost(JobId),
}

/// Claims due jobs and dispatches them to the sender registered for their type.
pub struct JobWorker {
    id: String,
    queue: JobQueue,
    senders: HashMap<String, Arc<dyn JobSender>>,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(id: impl Into<String>, queue: JobQueue, poll_interval: Duration) -> Self {
        Self {
            id: id.into(),
            queue,
            senders: HashMap::new(),
            poll_interval,
        }
    }

    /// Registers a sender under its [`JobSender::job_type`], replacing any previous one.
    pub fn with_sender(mut self, sender: Arc<dyn JobSender>) -> Self {
        self.senders.insert(sender.job_type().to_string(), sender);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Processes jobs until `cancel` fires. Sleeps `poll_interval` whenever
    /// the queue is empty or the store fails.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(worker = %self.id, senders = self.senders.len(), "Job worker started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let idle = match self.run_once().await {
                Ok(RunReport::Idle) => true,
                Ok(_) => false,
                Err(e) => {
                    error!(worker = %self.id, error = %e, "Job worker iteration failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        info!(worker = %self.id, "Job worker stopped");
    }

    /// Claims and handles at most one job.
    pub async fn run_once(&self) -> Result<RunReport, JobError> {
        let Some(job) = self.queue.claim(&self.id).await? else {
            return Ok(RunReport::Idle);
        };
        debug!(worker = %self.id, job_id = %job.id, job_type = %job.job_type, "Processing job");

        let outcome = match self.senders.get(&job.job_type) {
            Some(sender) => sender.send(&job).await,
            None => SendOutcome::permanent(format!("no sender for job type '{}'", job.job_type)),
        };

        let failed = match outcome {
            SendOutcome::Delivered => {
                return if self.queue.complete(job.id, &self.id).await? {
                    Ok(RunReport::Delivered(job.id))
                } else {
                    Ok(RunReport::LeaseLost(job.id))
                };
            }
            SendOutcome::Retryable(reason) => self.queue.fail(job.id, &self.id, &reason).await?,
            SendOutcome::Permanent(reason) => {
                warn!(job_id = %job.id, error = %reason, "Permanent job failure");
                self.queue
                    .fail_permanently(job.id, &self.id, &reason)
                    .await?
            }
        };
        Ok(match failed {
            FailOutcome::Retried { .. } => RunReport::Retried(job.id),
            FailOutcome::DeadLettered { .. } => RunReport::DeadLettered(job.id),
            FailOutcome::LeaseLost => RunReport::LeaseLost(job.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobsConfig;
    use crate::queue::EnqueueOptions;
    use aegis_core::{Job, JobStatus};
    use aegis_db_memory::InMemoryJobStorage;
    use aegis_storage::JobStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSender {
        calls: AtomicUsize,
        outcome: SendOutcome,
    }

    #[async_trait]
    impl JobSender for CountingSender {
        fn job_type(&self) -> &str {
            "test.job"
        }

        async fn send(&self, _job: &Job) -> SendOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn queue_with(storage: Arc<InMemoryJobStorage>, lease: Duration) -> JobQueue {
        let config = JobsConfig {
            backoff_base: Duration::from_millis(5),
            max_backoff: Duration::from_secs(1),
            lease,
            ..JobsConfig::default()
        };
        JobQueue::new(storage, &config)
    }

    #[tokio::test]
    async fn test_unknown_job_type_dead_letters() {
        let storage = Arc::new(InMemoryJobStorage::new());
        let queue = queue_with(storage.clone(), Duration::from_secs(30));
        let id = queue
            .enqueue("nobody.handles.this", serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        let worker = JobWorker::new("w1", queue, Duration::from_millis(10));
        assert_eq!(worker.run_once().await.unwrap(), RunReport::DeadLettered(id));
        let job = storage.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::DeadLettered);
    }

    #[tokio::test]
    async fn test_expired_lease_reclaimed_by_second_worker() {
        let storage = Arc::new(InMemoryJobStorage::new());
        let queue = queue_with(storage.clone(), Duration::from_millis(50));
        let id = queue
            .enqueue("test.job", serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        // Worker A claims and dies without reporting back.
        let claimed = queue.claim("worker-a").await.unwrap().unwrap();
        assert_eq!(claimed.id, id);

        let sender = Arc::new(CountingSender {
            calls: AtomicUsize::new(0),
            outcome: SendOutcome::Delivered,
        });
        let worker_b = JobWorker::new("worker-b", queue.clone(), Duration::from_millis(10))
            .with_sender(sender.clone());

        assert_eq!(worker_b.run_once().await.unwrap(), RunReport::Idle);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(worker_b.run_once().await.unwrap(), RunReport::Delivered(id));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
        assert!(storage.get(id).await.unwrap().is_none());
    }

    struct SlowSender {
        delay: Duration,
    }

    #[async_trait]
    impl JobSender for SlowSender {
        fn job_type(&self) -> &str {
            "test.job"
        }

        async fn send(&self, _job: &Job) -> SendOutcome {
            tokio::time::sleep(self.delay).await;
            SendOutcome::retryable("upstream timeout")
        }
    }

    #[tokio::test]
    async fn test_slow_worker_reports_lease_lost() {
        let storage = Arc::new(InMemoryJobStorage::new());
        let queue = queue_with(storage.clone(), Duration::from_millis(30));
        let id = queue
            .enqueue("test.job", serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        let slow = JobWorker::new("worker-a", queue.clone(), Duration::from_millis(10))
            .with_sender(Arc::new(SlowSender {
                delay: Duration::from_millis(80),
            }));
        let handle = tokio::spawn(async move { slow.run_once().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let long_lease = queue_with(storage.clone(), Duration::from_secs(30));
        let reclaimed = long_lease.claim("worker-b").await.unwrap().unwrap();
        assert_eq!(reclaimed.id, id);

        assert_eq!(handle.await.unwrap().unwrap(), RunReport::LeaseLost(id));
        let job = storage.get(id).await.unwrap().unwrap();
        assert_eq!(job.lease_owner.as_deref(), Some("worker-b"));
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let storage = Arc::new(InMemoryJobStorage::new());
        let queue = queue_with(storage.clone(), Duration::from_secs(30));
        let sender = Arc::new(CountingSender {
            calls: AtomicUsize::new(0),
            outcome: SendOutcome::Delivered,
        });
        for _ in 0..3 {
            queue
                .enqueue("test.job", serde_json::json!({}), EnqueueOptions::default())
                .await
                .unwrap();
        }

        let worker = Arc::new(
            JobWorker::new("w1", queue.clone(), Duration::from_millis(10)).with_sender(sender.clone()),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let worker = worker.clone();
            let cancel = cancel.clone();
            async move { worker.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker stops")
            .unwrap();

        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.stats().await.unwrap().scheduled, 0);
    }
}
