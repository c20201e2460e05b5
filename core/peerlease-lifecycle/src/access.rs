//! Access control for device provisioning.

use crate::error::LifecycleResult;
use chrono::{DateTime, Duration, Utc};
use peerlease_db::{PeerDirectory, Subscription};
use peerlease_types::{SubscriptionStatus, UserId};
use std::fmt;

/// Why a user may not provision a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    NoSubscription,
    Expired,
    /// In grace period; devices keep working but no new ones are issued.
    Paused { grace_remaining: Option<Duration> },
    DeviceLimitReached { current: u32, limit: u32 },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSubscription => write!(f, "no subscription"),
            Self::Expired => write!(f, "expired"),
            Self::Paused { .. } => write!(f, "paused"),
            Self::DeviceLimitReached { current, limit } => {
                write!(f, "device limit reached ({current}/{limit})")
            }
        }
    }
}

/// The gate's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed { subscription: Subscription },
    Denied(DenyReason),
}

impl AccessDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Decides whether a user may provision another device.
#[derive(Clone)]
pub struct AccessGate {
    directory: PeerDirectory,
}

impl AccessGate {
    pub fn new(directory: PeerDirectory) -> Self {
        Self { directory }
    }

    /// Evaluates the user's live subscription, or failing that their most
    /// recent one. Rules apply in order; the first match wins.
    pub fn check(&self, user: UserId, now: DateTime<Utc>) -> LifecycleResult<AccessDecision> {
        let subscription = match self.directory.live_subscription(user)? {
            Some(sub) => Some(sub),
            None => self.directory.latest_subscription(user)?,
        };
        let Some(sub) = subscription else {
            return Ok(AccessDecision::Denied(DenyReason::NoSubscription));
        };

        match sub.status {
            SubscriptionStatus::Expired => {
                return Ok(AccessDecision::Denied(DenyReason::Expired));
            }
            SubscriptionStatus::Paused => {
                if sub.grace_period_ends_at.is_some_and(|grace| now >= grace) {
                    return Ok(AccessDecision::Denied(DenyReason::Expired));
                }
                return Ok(AccessDecision::Denied(DenyReason::Paused {
                    grace_remaining: sub.grace_period_ends_at.map(|grace| grace - now),
                }));
            }
            SubscriptionStatus::Active | SubscriptionStatus::Expiring => {}
        }

        if now >= sub.ends_at {
            return Ok(AccessDecision::Denied(DenyReason::Expired));
        }

        let current = self.directory.count_active_devices(sub.id)?;
        if current >= sub.device_limit {
            return Ok(AccessDecision::Denied(DenyReason::DeviceLimitReached {
                current,
                limit: sub.device_limit,
            }));
        }

        Ok(AccessDecision::Allowed { subscription: sub })
    }
}
