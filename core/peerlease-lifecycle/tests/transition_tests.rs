//! Tests for time-driven status transitions.

mod common;

use chrono::Duration;
use common::{directory_with_user, subscription, t0};
use peerlease_lifecycle::{Transition, next_transition, sweep};
use peerlease_types::SubscriptionStatus;
use pretty_assertions::assert_eq;

// ── next_transition ─────────────────────────────────────────────

#[test]
fn active_enters_expiring_three_days_before_end() {
    let (dir, user) = directory_with_user();
    let sub = subscription(&dir, user, SubscriptionStatus::Active, t0(), None, 1);

    let before = t0() - Duration::days(3) - Duration::seconds(1);
    assert_eq!(next_transition(&sub, before), None);
    assert_eq!(
        next_transition(&sub, t0() - Duration::days(3)),
        Some(Transition::StartExpiring)
    );
    assert_eq!(
        next_transition(&sub, t0() - Duration::seconds(1)),
        Some(Transition::StartExpiring)
    );
}

#[test]
fn active_past_end_is_left_alone() {
    let (dir, user) = directory_with_user();
    let sub = subscription(&dir, user, SubscriptionStatus::Active, t0(), None, 1);
    assert_eq!(next_transition(&sub, t0()), None);
}

#[test]
fn expiring_pauses_at_end_with_grace() {
    let (dir, user) = directory_with_user();
    let sub = subscription(&dir, user, SubscriptionStatus::Expiring, t0(), None, 1);

    assert_eq!(next_transition(&sub, t0() - Duration::seconds(1)), None);
    assert_eq!(
        next_transition(&sub, t0()),
        Some(Transition::Pause {
            grace_period_ends_at: t0() + Duration::days(3)
        })
    );
}

#[test]
fn paused_expires_when_grace_ends() {
    let (dir, user) = directory_with_user();
    let grace = t0() + Duration::days(3);
    let sub = subscription(&dir, user, SubscriptionStatus::Paused, t0(), Some(grace), 1);

    assert_eq!(next_transition(&sub, grace - Duration::seconds(1)), None);
    assert_eq!(next_transition(&sub, grace), Some(Transition::Expire));
    assert_eq!(Transition::Expire.target(), SubscriptionStatus::Expired);
}

// ── sweep ───────────────────────────────────────────────────────

#[test]
fn expiring_past_end_becomes_paused_with_grace() {
    let (dir, user) = directory_with_user();
    let now = t0();
    let sub = subscription(
        &dir,
        user,
        SubscriptionStatus::Expiring,
        now - Duration::seconds(1),
        None,
        1,
    );

    let report = sweep(&dir, now).unwrap();

    assert_eq!(report.applied.len(), 1);
    let after = dir.subscription_by_id(sub.id).unwrap().unwrap();
    assert_eq!(after.status, SubscriptionStatus::Paused);
    assert_eq!(after.grace_period_ends_at, Some(sub.ends_at + Duration::days(3)));
}

#[test]
fn sweep_is_idempotent() {
    let (dir, user) = directory_with_user();
    let other = dir.get_or_create_user(78, "other").unwrap().id;
    subscription(&dir, user, SubscriptionStatus::Active, t0() + Duration::days(1), None, 1);
    subscription(&dir, other, SubscriptionStatus::Expiring, t0() - Duration::hours(1), None, 1);
    let now = t0();

    let first = sweep(&dir, now).unwrap();
    let snapshot = dir.live_subscriptions().unwrap();
    let second = sweep(&dir, now).unwrap();

    assert_eq!(first.applied.len(), 2);
    assert!(second.applied.is_empty());
    assert_eq!(second.failed, 0);
    assert_eq!(dir.live_subscriptions().unwrap(), snapshot);
}

#[test]
fn full_walk_from_active_to_expired() {
    let (dir, user) = directory_with_user();
    let sub = subscription(&dir, user, SubscriptionStatus::Active, t0(), None, 1);
    let status = |dir: &peerlease_db::PeerDirectory| {
        dir.subscription_by_id(sub.id).unwrap().unwrap().status
    };

    sweep(&dir, t0() - Duration::days(2)).unwrap();
    assert_eq!(status(&dir), SubscriptionStatus::Expiring);

    sweep(&dir, t0() + Duration::minutes(5)).unwrap();
    assert_eq!(status(&dir), SubscriptionStatus::Paused);

    sweep(&dir, t0() + Duration::days(3)).unwrap();
    let expired = dir.subscription_by_id(sub.id).unwrap().unwrap();
    assert_eq!(expired.status, SubscriptionStatus::Expired);
    assert_eq!(expired.grace_period_ends_at, Some(t0() + Duration::days(3)));

    let report = sweep(&dir, t0() + Duration::days(10)).unwrap();
    assert_eq!(report.examined, 0);
}
