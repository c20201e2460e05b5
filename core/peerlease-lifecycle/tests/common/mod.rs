//! Shared fixtures for lifecycle tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use peerlease_db::{NewDevice, NewSubscription, PeerDirectory, Subscription};
use peerlease_types::{PeerKey, SubscriptionStatus, UserId};
use std::net::Ipv4Addr;

/// A fixed reference instant on a whole second.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn directory_with_user() -> (PeerDirectory, UserId) {
    let dir = PeerDirectory::open_in_memory().unwrap();
    let user = dir.get_or_create_user(77, "member").unwrap();
    (dir, user.id)
}

/// Inserts a subscription that ends at `ends_at` and started 30 days earlier.
pub fn subscription(
    dir: &PeerDirectory,
    user: UserId,
    status: SubscriptionStatus,
    ends_at: DateTime<Utc>,
    grace_period_ends_at: Option<DateTime<Utc>>,
    device_limit: u32,
) -> Subscription {
    dir.insert_subscription(&NewSubscription {
        user_id: user,
        device_limit,
        status,
        starts_at: ends_at - Duration::days(30),
        ends_at,
        grace_period_ends_at,
    })
    .unwrap()
}

pub fn add_device(dir: &PeerDirectory, sub: &Subscription, n: u8) -> peerlease_db::Device {
    dir.create_device(&NewDevice {
        user_id: sub.user_id,
        subscription_id: sub.id,
        name: format!("device_{n}"),
        public_key: PeerKey::from_bytes([n; 32]),
        assigned_address: Ipv4Addr::new(10, 8, 0, n),
    })
    .unwrap()
}
