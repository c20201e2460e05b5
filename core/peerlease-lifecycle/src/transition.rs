//! Time-driven status transitions.

use crate::error::LifecycleResult;
use chrono::{DateTime, Duration, Utc};
use peerlease_db::{PeerDirectory, Subscription};
use peerlease_types::{SubscriptionId, SubscriptionStatus, UserId};
use tracing::{info, warn};

/// How long before `ends_at` an Active subscription becomes Expiring.
pub fn expiring_window() -> Duration {
    Duration::days(3)
}

/// How long a Paused subscription keeps its devices before expiring.
pub fn grace_period() -> Duration {
    Duration::days(3)
}

/// One step of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Active → Expiring.
    StartExpiring,
    /// Expiring → Paused.
    Pause { grace_period_ends_at: DateTime<Utc> },
    /// Paused → Expired.
    Expire,
}

impl Transition {
    /// The status the subscription ends up in.
    pub fn target(&self) -> SubscriptionStatus {
        match self {
            Self::StartExpiring => SubscriptionStatus::Expiring,
            Self::Pause { .. } => SubscriptionStatus::Paused,
            Self::Expire => SubscriptionStatus::Expired,
        }
    }
}

/// Returns the transition due for `sub` at `now`, if any.
///
/// Guards are mutually exclusive and each target fails its own guard, so
/// applying the result and asking again yields at most the next step.
pub fn next_transition(sub: &Subscription, now: DateTime<Utc>) -> Option<Transition> {
    match sub.status {
        SubscriptionStatus::Active
            if now >= sub.ends_at - expiring_window() && now < sub.ends_at =>
        {
            Some(Transition::StartExpiring)
        }
        SubscriptionStatus::Expiring if now >= sub.ends_at => Some(Transition::Pause {
            grace_period_ends_at: sub.ends_at + grace_period(),
        }),
        SubscriptionStatus::Paused => {
            let grace_ends = sub
                .grace_period_ends_at
                .unwrap_or(sub.ends_at + grace_period());
            (now >= grace_ends).then_some(Transition::Expire)
        }
        _ => None,
    }
}

/// A transition that was written to the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransition {
    pub subscription: SubscriptionId,
    pub user: UserId,
    pub transition: Transition,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub applied: Vec<AppliedTransition>,
    pub failed: usize,
}

/// Applies the due transition to every live subscription.
///
/// A failure on one subscription is logged and counted; the sweep goes on.
pub fn sweep(directory: &PeerDirectory, now: DateTime<Utc>) -> LifecycleResult<SweepReport> {
    let live = directory.live_subscriptions()?;
    let mut report = SweepReport {
        examined: live.len(),
        ..SweepReport::default()
    };

    for sub in &live {
        let Some(transition) = next_transition(sub, now) else {
            continue;
        };
        let grace = match transition {
            Transition::StartExpiring => None,
            Transition::Pause {
                grace_period_ends_at,
            } => Some(grace_period_ends_at),
            Transition::Expire => Some(
                sub.grace_period_ends_at
                    .unwrap_or(sub.ends_at + grace_period()),
            ),
        };
        match directory.update_subscription_status(sub.id, transition.target(), grace) {
            Ok(()) => {
                info!(
                    "Subscription {} of user {}: {} -> {}",
                    sub.id,
                    sub.user_id,
                    sub.status,
                    transition.target()
                );
                report.applied.push(AppliedTransition {
                    subscription: sub.id,
                    user: sub.user_id,
                    transition,
                });
            }
            Err(e) => {
                warn!("Failed to move subscription {}: {}", sub.id, e);
                report.failed += 1;
            }
        }
    }
    Ok(report)
}
