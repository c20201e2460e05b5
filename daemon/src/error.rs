//! HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use peerlease_db::DbError;
use peerlease_lifecycle::LifecycleError;
use peerlease_provision::{ErrorKind, ProvisionError};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

/// Message returned to users for any internal provisioning failure.
pub const PROVISIONING_FAILED: &str = "provisioning failed";

/// An error rendered as `{"error": "..."}` with a matching status code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("missing or invalid admin token")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Maps a provisioning error for a user-facing route: internal details
    /// are logged and replaced by a generic message.
    pub fn user_facing(err: ProvisionError) -> Self {
        match err.kind() {
            ErrorKind::Validation => Self::BadRequest(err.to_string()),
            ErrorKind::Conflict => Self::Conflict(err.to_string()),
            ErrorKind::LimitReached => Self::Forbidden(err.to_string()),
            _ => {
                warn!("Provisioning failed: {}", err);
                Self::Internal(PROVISIONING_FAILED.to_string())
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        let msg = err.to_string();
        match err.kind() {
            ErrorKind::Validation => Self::BadRequest(msg),
            ErrorKind::NotFound => Self::NotFound(msg),
            ErrorKind::Conflict => Self::Conflict(msg),
            ErrorKind::LimitReached => Self::Forbidden(msg),
            _ => Self::Internal(msg),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Validation(msg) => Self::BadRequest(msg),
            LifecycleError::NotFound(msg) => Self::NotFound(msg),
            LifecycleError::Directory(e) => e.into(),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => Self::NotFound(msg),
            DbError::Conflict(msg) => Self::Conflict(msg),
            DbError::Validation(msg) => Self::BadRequest(msg),
            limit @ DbError::DeviceLimit { .. } => Self::Forbidden(limit.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
