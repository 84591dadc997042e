use aegis_core::{JobId, SecurityError};
use aegis_storage::StorageError;

/// Errors raised by the job queue.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Job not found: {job_id}")]
    NotFound { job_id: JobId },

    /// A dead-lettered job was expected but the job is in another state.
    #[error("Job {job_id} is not dead-lettered")]
    NotDeadLettered { job_id: JobId },

    #[error("Invalid job configuration: {0}")]
    Config(String),
}

impl JobError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<JobError> for SecurityError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Storage(e) => e.into(),
            JobError::NotFound { job_id } | JobError::NotDeadLettered { job_id } => {
                SecurityError::not_found(format!("dead-lettered job {job_id}"))
            }
            JobError::Config(message) => SecurityError::internal(message),
        }
    }
}
