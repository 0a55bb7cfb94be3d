//! Error types for scheduler runs.
//!
//! Errors are classified by blast radius:
//! - Config: fatal before any write
//! - Store/Sqlite: fatal for the current batch transaction; the coordinator
//!   retries the batch once, then aborts the run
//! - Cancelled: only raised at a batch boundary
//!
//! Per-contact data problems are not errors at all — they become
//! [`Diagnostic`] values on the run summary and the run continues.

use thiserror::Error;

/// Fatal errors for a scheduler run.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Run cancelled at batch boundary: {0}")]
    Cancelled(String),
}

impl SchedulerError {
    /// Whether a batch that failed with this error is worth one retry.
    ///
    /// Only transient SQLite contention qualifies; schema and constraint
    /// failures will fail again identically.
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// A per-contact data problem (malformed date, missing email, dangling
/// enrollment). The contact is skipped; the run continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub contact_id: i64,
    pub message: String,
}

impl Diagnostic {
    pub fn new(contact_id: i64, message: impl Into<String>) -> Self {
        Self {
            contact_id,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "contact {}: {}", self.contact_id, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_errors_are_retryable() {
        let err = SchedulerError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn config_errors_are_not_retryable() {
        let err = SchedulerError::Config("missing organization row".to_string());
        assert!(!err.is_retryable());
    }
}
