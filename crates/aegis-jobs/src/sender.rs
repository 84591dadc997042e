use aegis_core::Job;
use async_trait::async_trait;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The job is done and can be removed.
    Delivered,
    /// Transient failure; the job is retried with backoff.
    Retryable(String),
    /// The job can never succeed; it goes straight to the dead-letter list.
    Permanent(String),
}

impl SendOutcome {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Retryable(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }
}

/// Delivers jobs of one type.
///
/// Senders must be idempotent: the same job may be delivered more than once
/// if a worker loses its lease before completing it.
#[async_trait]
pub trait JobSender: Send + Sync {
    /// The job type this sender handles, e.g. `webhook.delivery`.
    fn job_type(&self) -> &str;

    async fn send(&self, job: &Job) -> SendOutcome;
}
