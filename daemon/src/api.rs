//! Admin HTTP API.

use crate::admin::AdminRegistry;
use crate::error::{ApiError, PROVISIONING_FAILED};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use peerlease_db::{Device, PeerDirectory, Subscription, User};
use peerlease_lifecycle::{AccessDecision, AccessGate, Approval, ApprovalOutcome, DenyReason, approve};
use peerlease_provision::{Provisioner, parse_public_key};
use peerlease_types::{DeviceId, UserId};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub directory: PeerDirectory,
    pub provisioner: Arc<dyn Provisioner>,
    pub gate: AccessGate,
    pub admins: Arc<AdminRegistry>,
}

impl AppState {
    pub fn new(
        directory: PeerDirectory,
        provisioner: Arc<dyn Provisioner>,
        admins: Arc<AdminRegistry>,
    ) -> Self {
        Self {
            gate: AccessGate::new(directory.clone()),
            directory,
            provisioner,
            admins,
        }
    }
}

// ── Request / response bodies ───────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub external_id: i64,
    pub handle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
    /// Seconds left in the grace period, for paused subscriptions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_remaining_secs: Option<i64>,
}

impl From<AccessDecision> for AccessResponse {
    fn from(decision: AccessDecision) -> Self {
        match decision {
            AccessDecision::Allowed { subscription } => Self {
                allowed: true,
                reason: None,
                subscription: Some(subscription),
                grace_remaining_secs: None,
            },
            AccessDecision::Denied(reason) => Self {
                allowed: false,
                grace_remaining_secs: match &reason {
                    DenyReason::Paused { grace_remaining } => {
                        grace_remaining.map(|d| d.num_seconds())
                    }
                    _ => None,
                },
                reason: Some(reason.to_string()),
                subscription: None,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateDeviceRequest {
    #[serde(default)]
    pub device_name: Option<String>,
    /// Client-generated public key; a key pair is generated when absent.
    #[serde(default)]
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeviceResponse {
    pub device_id: DeviceId,
    pub public_key: String,
    pub assigned_address: Ipv4Addr,
    /// wg-quick client configuration.
    pub config: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub user_id: UserId,
    pub duration_days: u32,
    pub device_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponse {
    /// `created` or `extended`.
    pub outcome: String,
    pub subscription: Subscription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub device_id: DeviceId,
    pub revoked: bool,
}

// ── Handlers ────────────────────────────────────────────────────

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<User>, ApiError> {
    let handle = req.handle.trim().to_string();
    if handle.is_empty() || handle.chars().any(char::is_control) {
        return Err(ApiError::BadRequest("handle must be non-empty text".to_string()));
    }
    let directory = state.directory.clone();
    let user = blocking(move || Ok(directory.get_or_create_user(req.external_id, &handle)?)).await?;
    Ok(Json(user))
}

async fn user_access(
    State(state): State<AppState>,
    Path(user): Path<UserId>,
) -> Result<Json<AccessResponse>, ApiError> {
    let decision = check_access(&state, user, Utc::now()).await?;
    Ok(Json(decision.into()))
}

async fn list_devices(
    State(state): State<AppState>,
    Path(user): Path<UserId>,
) -> Result<Json<Vec<Device>>, ApiError> {
    require_user(&state, user).await?;
    let directory = state.directory.clone();
    let devices = blocking(move || Ok(directory.devices_for_user(user)?)).await?;
    Ok(Json(devices))
}

async fn create_device(
    State(state): State<AppState>,
    Path(user): Path<UserId>,
    Json(req): Json<CreateDeviceRequest>,
) -> Result<Json<CreateDeviceResponse>, ApiError> {
    let subscription = match check_access(&state, user, Utc::now()).await? {
        AccessDecision::Allowed { subscription } => subscription,
        AccessDecision::Denied(reason) => return Err(ApiError::Forbidden(reason.to_string())),
    };

    let name = match req.device_name.map(|n| n.trim().to_string()) {
        Some(name) if !name.is_empty() => name,
        _ => {
            let directory = state.directory.clone();
            let existing = blocking(move || Ok(directory.devices_for_user(user)?)).await?;
            default_device_name(existing.len())
        }
    };

    // A create must run to completion even if the client disconnects.
    let provisioner = Arc::clone(&state.provisioner);
    let supplied_key = req
        .public_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());
    let task = tokio::spawn(async move {
        match supplied_key {
            Some(key) => {
                provisioner
                    .create_with_supplied_key(&key, user, subscription.id, &name)
                    .await
            }
            None => {
                provisioner
                    .create_with_generated_key(user, subscription.id, &name)
                    .await
            }
        }
    });
    let provisioned = task
        .await
        .map_err(|e| {
            warn!("Provisioning task failed: {}", e);
            ApiError::Internal(PROVISIONING_FAILED.to_string())
        })?
        .map_err(ApiError::user_facing)?;

    Ok(Json(CreateDeviceResponse {
        device_id: provisioned.device_id,
        public_key: provisioned.public_key.to_base64(),
        assigned_address: provisioned.assigned_address,
        config: String::from_utf8_lossy(&provisioned.config).into_owned(),
    }))
}

async fn create_approval(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ApprovalRequest>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let admin = require_admin(&state, &headers).await?;
    let approval = Approval {
        user: req.user_id,
        duration_days: req.duration_days,
        device_limit: req.device_limit,
    };
    let directory = state.directory.clone();
    let outcome = blocking(move || Ok(approve(&directory, &approval, Utc::now())?)).await?;
    info!("Admin {} approved {} days for user {}", admin, req.duration_days, req.user_id);

    let (label, subscription) = match outcome {
        ApprovalOutcome::Created(sub) => ("created", sub),
        ApprovalOutcome::Extended(sub) => ("extended", sub),
    };
    Ok(Json(ApprovalResponse {
        outcome: label.to_string(),
        subscription,
    }))
}

async fn revoke_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(public_key): Path<String>,
) -> Result<Json<RevokeResponse>, ApiError> {
    let admin = require_admin(&state, &headers).await?;
    let key = parse_public_key(&public_key)?;

    let directory = state.directory.clone();
    let device = blocking(move || Ok(directory.active_device_by_key(&key)?))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no active device with key {key}")))?;

    state.provisioner.revoke(&key.to_base64()).await?;

    let directory = state.directory.clone();
    let device_id = device.id;
    let revoked = blocking(move || Ok(directory.revoke_device(device_id)?)).await?;
    info!("Admin {} revoked device {} ({})", admin, device_id, key);
    Ok(Json(RevokeResponse { device_id, revoked }))
}

// ── Helpers ─────────────────────────────────────────────────────

/// `device_<n+1>` for a user who already has `n` devices.
pub fn default_device_name(existing: usize) -> String {
    format!("device_{}", existing + 1)
}

async fn require_user(state: &AppState, user: UserId) -> Result<User, ApiError> {
    let directory = state.directory.clone();
    blocking(move || Ok(directory.user_by_id(user)?))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {user}")))
}

async fn check_access(
    state: &AppState,
    user: UserId,
    now: DateTime<Utc>,
) -> Result<AccessDecision, ApiError> {
    require_user(state, user).await?;
    let gate = state.gate.clone();
    blocking(move || Ok(gate.check(user, now)?)).await
}

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(ApiError::Unauthorized)?;
    state
        .admins
        .authorize(token)
        .await
        .ok_or(ApiError::Unauthorized)
}

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("background task failed: {e}")))?
}

/// Build the HTTP API router with the given state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/users", post(create_user))
        .route("/api/v1/users/{id}/access", get(user_access))
        .route("/api/v1/users/{id}/devices", get(list_devices).post(create_device))
        .route("/api/v1/approvals", post(create_approval))
        .route("/api/v1/devices/{public_key}", delete(revoke_device))
        .with_state(state)
}
