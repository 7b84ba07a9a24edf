//! Error types for queue persistence and validation.
//!
//! Storage failures are converted from `sqlx::Error` so repositories can use
//! `?` directly; validation failures surface synchronously to the caller and
//! are never retried.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for queue operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Caller supplied an invalid argument, e.g. an empty webhook URL.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Returns true when the error was caused by the caller rather than the
    /// store.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::InvalidInput(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("webhook record not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::ConstraintViolation(format!("check constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let error = CoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(error, CoreError::NotFound(_)));
        assert!(error.is_caller_error());
    }

    #[test]
    fn pool_errors_map_to_database() {
        let error = CoreError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(error, CoreError::Database(_)));
        assert!(!error.is_caller_error());
    }
}
