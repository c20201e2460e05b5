//! Error types for the subscription lifecycle.

use peerlease_db::DbError;
use thiserror::Error;

/// Lifecycle-specific errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The request carries values that can never be applied.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The referenced user or subscription does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Directory(#[from] DbError),
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
