//! Core type definitions for peerlease.
//!
//! This crate defines the small vocabulary shared by every other crate:
//! - Row identifiers for users, subscriptions and devices
//! - WireGuard peer public keys
//! - The subscription status enum

mod ids;
mod key;
mod status;

pub use ids::{DeviceId, SubscriptionId, UserId};
pub use key::{PeerKey, KEY_LEN};
pub use status::SubscriptionStatus;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid peer key: {0}")]
    InvalidKey(String),

    #[error("unknown subscription status: {0}")]
    UnknownStatus(String),
}
