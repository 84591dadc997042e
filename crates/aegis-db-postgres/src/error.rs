use aegis_storage::StorageError;
use sqlx_core::error::Error as SqlxError;

/// Errors raised while setting up the PostgreSQL backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    #[error("Database connection error: {0}")]
    Connection(#[from] SqlxError),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PostgresError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for StorageError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Connection(e) => map_sqlx(e),
            other => StorageError::database(other.to_string()),
        }
    }
}

/// Classifies a sqlx error: connectivity problems become `Unavailable`,
/// unique violations `Conflict`, everything else `Database`.
pub(crate) fn map_sqlx(err: SqlxError) -> StorageError {
    match &err {
        SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Io(_) | SqlxError::Tls(_) => {
            StorageError::unavailable(err.to_string())
        }
        SqlxError::Database(db_err) if db_err.is_unique_violation() => {
            StorageError::conflict(db_err.message().to_string())
        }
        _ => StorageError::database(err.to_string()),
    }
}

pub(crate) fn corrupt(column: &str, value: &str) -> StorageError {
    StorageError::database(format!("unexpected value '{value}' in column {column}"))
}
