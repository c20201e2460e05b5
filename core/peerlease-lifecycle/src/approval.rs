//! Payment approvals.

use crate::error::{LifecycleError, LifecycleResult};
use chrono::{DateTime, Duration, Utc};
use peerlease_db::{NewSubscription, PeerDirectory, Subscription};
use peerlease_types::{SubscriptionStatus, UserId};
use tracing::info;

/// An approved payment for `duration_days` of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Approval {
    pub user: UserId,
    pub duration_days: u32,
    /// Used only when a new subscription is created.
    pub device_limit: u32,
}

/// What an approval did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Created(Subscription),
    Extended(Subscription),
}

impl ApprovalOutcome {
    pub fn subscription(&self) -> &Subscription {
        match self {
            Self::Created(sub) | Self::Extended(sub) => sub,
        }
    }
}

/// Applies an approval in one transaction.
///
/// A live subscription is extended from its current end and made Active
/// again; otherwise a new subscription covering `[now, now + duration)` is
/// created.
pub fn approve(
    directory: &PeerDirectory,
    approval: &Approval,
    now: DateTime<Utc>,
) -> LifecycleResult<ApprovalOutcome> {
    if approval.duration_days == 0 {
        return Err(LifecycleError::Validation(
            "duration must be at least one day".to_string(),
        ));
    }
    if approval.device_limit == 0 {
        return Err(LifecycleError::Validation(
            "device limit must be at least 1".to_string(),
        ));
    }
    let duration = Duration::days(i64::from(approval.duration_days));
    let user = approval.user;

    let outcome = directory.transaction(|tx| {
        if tx.user_by_id(user)?.is_none() {
            return Err(LifecycleError::NotFound(format!("user {user}")));
        }
        match tx.live_subscription(user)? {
            Some(live) => {
                let extended = tx.extend_subscription(live.id, live.ends_at + duration)?;
                Ok(ApprovalOutcome::Extended(extended))
            }
            None => {
                let created = tx.insert_subscription(&NewSubscription {
                    user_id: user,
                    device_limit: approval.device_limit,
                    status: SubscriptionStatus::Active,
                    starts_at: now,
                    ends_at: now + duration,
                    grace_period_ends_at: None,
                })?;
                Ok(ApprovalOutcome::Created(created))
            }
        }
    })?;

    let sub = outcome.subscription();
    info!(
        "Approved {} days for user {}: subscription {} now ends {}",
        approval.duration_days, user, sub.id, sub.ends_at
    );
    Ok(outcome)
}
