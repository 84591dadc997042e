use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::id::{JobId, TenantId};

/// Lifecycle state of a queued job. Completed jobs are deleted, so there is
/// no terminal success state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its scheduled time.
    Scheduled,
    /// Claimed by a worker under a lease.
    Processing,
    /// Exhausted its attempts; needs operator attention.
    DeadLettered,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::DeadLettered => "dead_lettered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(Self::Scheduled),
            "processing" => Some(Self::Processing),
            "dead_lettered" => Some(Self::DeadLettered),
            _ => None,
        }
    }
}

/// A job as stored in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub payload: Value,
    pub priority: i16,
    pub attempts: i32,
    pub max_attempts: i32,
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub lease_expires_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Job {
    /// Returns `true` if a worker may claim this job at `now`: either it is
    /// scheduled and due, or its processing lease has lapsed.
    pub fn is_claimable_at(&self, now: OffsetDateTime) -> bool {
        match self.status {
            JobStatus::Scheduled => self.scheduled_at <= now,
            JobStatus::Processing => self.lease_expires_at.is_some_and(|exp| exp <= now),
            JobStatus::DeadLettered => false,
        }
    }
}

/// A job about to be enqueued.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub job_type: String,
    pub payload: Value,
    pub priority: i16,
    pub max_attempts: i32,
    pub scheduled_at: OffsetDateTime,
    pub tenant_id: Option<TenantId>,
}

impl NewJob {
    pub fn into_job(self) -> Job {
        let now = OffsetDateTime::now_utc();
        Job {
            id: self.id,
            job_type: self.job_type,
            payload: self.payload,
            priority: self.priority,
            attempts: 0,
            max_attempts: self.max_attempts,
            status: JobStatus::Scheduled,
            scheduled_at: self.scheduled_at,
            lease_owner: None,
            lease_expires_at: None,
            last_error: None,
            tenant_id: self.tenant_id,
            created_at: now,
            updated_at: now,
        }
    }
}
