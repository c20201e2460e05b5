//! Ledger rows.

use chrono::{DateTime, Utc};
use peerlease_types::{DeviceId, PeerKey, SubscriptionId, SubscriptionStatus, UserId};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// One external account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Identity in the external system (chat account id).
    pub external_id: i64,
    /// Display handle, refreshed on contact.
    pub handle: String,
    pub created_at: DateTime<Utc>,
}

/// A purchased entitlement window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub device_limit: u32,
    pub status: SubscriptionStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Set when the subscription enters `Paused`.
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields for a new subscription row.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: UserId,
    pub device_limit: u32,
    pub status: SubscriptionStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub grace_period_ends_at: Option<DateTime<Utc>>,
}

impl NewSubscription {
    /// Checks the row invariants enforced by the schema.
    pub(crate) fn validate(&self) -> crate::DbResult<()> {
        if self.device_limit == 0 {
            return Err(crate::DbError::Validation(
                "device limit must be at least 1".to_string(),
            ));
        }
        if self.ends_at <= self.starts_at {
            return Err(crate::DbError::Validation(format!(
                "subscription must end after it starts ({} <= {})",
                self.ends_at, self.starts_at
            )));
        }
        if let Some(grace) = self.grace_period_ends_at {
            if grace <= self.ends_at {
                return Err(crate::DbError::Validation(format!(
                    "grace period must end after the subscription ({grace} <= {})",
                    self.ends_at
                )));
            }
        }
        Ok(())
    }
}

/// One provisioned peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub user_id: UserId,
    pub subscription_id: SubscriptionId,
    pub name: String,
    pub public_key: PeerKey,
    pub assigned_address: Ipv4Addr,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Returns true until the device has been revoked.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// Fields for a new device row.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub user_id: UserId,
    pub subscription_id: SubscriptionId,
    pub name: String,
    pub public_key: PeerKey,
    pub assigned_address: Ipv4Addr,
}
