//! Error types for provisioning.

use peerlease_db::DbError;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Result type for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors that can occur while provisioning or revoking a peer.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The live interface or remote host failed; retrying may succeed.
    #[error("backend unavailable: {0}")]
    TransientBackend(String),

    #[error("address allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    /// Misconfiguration detected while constructing a backend.
    #[error("startup failed: {0}")]
    FatalStartup(String),

    #[error(transparent)]
    Directory(#[from] DbError),
}

/// Why the allocator could not produce an address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("no base address could be determined")]
    Undeterminable,

    #[error("address pool exhausted after {last}")]
    Exhausted { last: Ipv4Addr },
}

/// Coarse classification of a [`ProvisionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    /// The subscription has no free device slot.
    LimitReached,
    TransientBackend,
    Allocation,
    FatalStartup,
    Storage,
}

impl ProvisionError {
    /// Classifies the error, looking through directory errors.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::TransientBackend(_) => ErrorKind::TransientBackend,
            Self::Allocation(_) => ErrorKind::Allocation,
            Self::FatalStartup(_) => ErrorKind::FatalStartup,
            Self::Directory(DbError::Conflict(_)) => ErrorKind::Conflict,
            Self::Directory(DbError::DeviceLimit { .. }) => ErrorKind::LimitReached,
            Self::Directory(DbError::NotFound(_)) => ErrorKind::NotFound,
            Self::Directory(DbError::Validation(_)) => ErrorKind::Validation,
            Self::Directory(_) => ErrorKind::Storage,
        }
    }
}
