use thiserror::Error;

/// Errors that can occur when talking to the coordination store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or timed out. Callers may retry later.
    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected a value (negative counter, zero amount, empty key).
    #[error("Invalid value for key {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// A database error that is not a connectivity fault.
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true for faults that are expected to clear on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        StoreError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            other => StoreError::Database(other),
        }
    }
}

/// Result type for coordination store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
