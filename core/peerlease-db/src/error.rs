//! Error types for the peer directory.

use thiserror::Error;

/// Result type for directory operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur while reading or writing the directory.
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite failure (I/O, locking, malformed SQL).
    #[error("storage error: {0}")]
    Storage(String),

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller passed values that violate a model invariant.
    #[error("invalid value: {0}")]
    Validation(String),

    /// A stored value could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The subscription already holds as many active devices as it allows.
    #[error("device limit reached ({current}/{limit})")]
    DeviceLimit { current: u32, limit: u32 },
}

impl DbError {
    pub(crate) fn sqlite(context: &str, err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(format!("{context}: {err}"))
            }
            rusqlite::Error::FromSqlConversionFailure(..) => {
                Self::Corrupt(format!("{context}: {err}"))
            }
            _ => Self::Storage(format!("{context}: {err}")),
        }
    }
}
