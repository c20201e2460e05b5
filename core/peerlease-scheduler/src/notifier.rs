//! User notifications.

use crate::error::SchedulerResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use peerlease_db::{Subscription, User};
use peerlease_lifecycle::{expiring_window, grace_period};
use peerlease_types::SubscriptionStatus;
use tracing::info;

/// Something a user should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The subscription ends soon.
    ExpiringSoon {
        ends_at: DateTime<Utc>,
        days_left: i64,
    },
    /// The subscription ended and the grace period has begun.
    GraceStarted { grace_period_ends_at: DateTime<Utc> },
}

/// Delivers notices. Implementations must not change subscription state.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user: &User, notice: &Notice) -> SchedulerResult<()>;
}

/// Writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user: &User, notice: &Notice) -> SchedulerResult<()> {
        match notice {
            Notice::ExpiringSoon { ends_at, days_left } => info!(
                "Notify user {} ({}): subscription ends {} ({} days left)",
                user.id, user.handle, ends_at, days_left
            ),
            Notice::GraceStarted {
                grace_period_ends_at,
            } => info!(
                "Notify user {} ({}): grace period until {}",
                user.id, user.handle, grace_period_ends_at
            ),
        }
        Ok(())
    }
}

/// Returns the notice due for `sub` at `now`.
///
/// Each notice has a one-day window so that a daily run sends it once.
pub fn notice_for(sub: &Subscription, now: DateTime<Utc>) -> Option<Notice> {
    let day = Duration::days(1);
    match sub.status {
        SubscriptionStatus::Active | SubscriptionStatus::Expiring => {
            let opens = sub.ends_at - expiring_window();
            (now >= opens && now < opens + day).then(|| Notice::ExpiringSoon {
                ends_at: sub.ends_at,
                days_left: ceil_days(sub.ends_at - now),
            })
        }
        SubscriptionStatus::Paused => {
            (now >= sub.ends_at && now < sub.ends_at + day).then(|| Notice::GraceStarted {
                grace_period_ends_at: sub
                    .grace_period_ends_at
                    .unwrap_or(sub.ends_at + grace_period()),
            })
        }
        SubscriptionStatus::Expired => None,
    }
}

fn ceil_days(d: Duration) -> i64 {
    let secs = d.num_seconds();
    (secs + 86_399).div_euclid(86_400)
}
