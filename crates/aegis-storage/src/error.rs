use aegis_core::SecurityError;

/// Errors raised by storage backends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// The durable store rejected or failed a query.
    #[error("Database error: {0}")]
    Database(String),

    /// The cache/counter store failed a command.
    #[error("Cache error: {0}")]
    Cache(String),

    /// The backend could not be reached (pool exhausted, connection refused, timeout).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    #[must_use]
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }

    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Returns `true` if the failure is transient and the operation may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Cache(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<StorageError> for SecurityError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(resource) => SecurityError::not_found(resource),
            other => SecurityError::internal(other.to_string()),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
