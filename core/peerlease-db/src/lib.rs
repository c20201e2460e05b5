//! Persistent peer directory for peerlease.
//!
//! Stores users, subscriptions and devices in SQLite. The directory is the
//! source of truth for address allocation and for the subscription lifecycle;
//! the WireGuard interface is treated as a projection of it.
//!
//! Uniqueness that must hold across concurrent writers is enforced by partial
//! unique indexes:
//! - at most one live (active, expiring or paused) subscription per user
//! - no two non-revoked devices share a public key
//! - no two non-revoked devices share an assigned address

mod directory;
mod error;
mod models;
mod schema;

pub use directory::{DirectoryTx, PeerDirectory};
pub use error::{DbError, DbResult};
pub use models::{Device, NewDevice, NewSubscription, Subscription, User};
