//! Shared fixtures for provisioning tests.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use peerlease_db::{NewSubscription, PeerDirectory};
use peerlease_provision::InterfaceNetwork;
use peerlease_types::{PeerKey, SubscriptionId, SubscriptionStatus, UserId};
use std::net::Ipv4Addr;

pub const ENDPOINT: &str = "vpn.example.net:51820";

pub fn network() -> InterfaceNetwork {
    InterfaceNetwork::new(Ipv4Addr::new(10, 8, 0, 1), 24).unwrap()
}

pub fn dns() -> Vec<String> {
    vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()]
}

pub fn key(byte: u8) -> PeerKey {
    PeerKey::from_bytes([byte; 32])
}

/// A directory holding one user with an active subscription.
pub fn directory_with_subscriber() -> (PeerDirectory, UserId, SubscriptionId) {
    directory_with_limit(100)
}

/// Like [`directory_with_subscriber`], with the given device limit.
pub fn directory_with_limit(device_limit: u32) -> (PeerDirectory, UserId, SubscriptionId) {
    let dir = PeerDirectory::open_in_memory().unwrap();
    let user = dir.get_or_create_user(1001, "subscriber").unwrap();
    let now = Utc::now();
    let sub = dir
        .insert_subscription(&NewSubscription {
            user_id: user.id,
            device_limit,
            status: SubscriptionStatus::Active,
            starts_at: now,
            ends_at: now + Duration::days(30),
            grace_period_ends_at: None,
        })
        .unwrap();
    (dir, user.id, sub.id)
}

pub fn config_text(config: &[u8]) -> String {
    String::from_utf8(config.to_vec()).unwrap()
}
