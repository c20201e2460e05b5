//! Error types for the scheduler.

use peerlease_db::DbError;
use peerlease_lifecycle::LifecycleError;
use thiserror::Error;

/// Scheduler errors. None of them stop the loop.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Directory(#[from] DbError),

    /// A notification could not be delivered.
    #[error("notification failed: {0}")]
    Notify(String),

    /// A blocking directory task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
