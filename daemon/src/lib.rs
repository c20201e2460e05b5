//! peerlease service.
//!
//! Exposes the admin HTTP API over a [`PeerDirectory`](peerlease_db::PeerDirectory)
//! and a provisioning backend. The binary wires it together with the
//! background scheduler.

pub mod admin;
pub mod api;
pub mod config;
pub mod error;

pub use admin::{AdminRegistry, parse_admin_tokens};
pub use api::{AppState, build_router};
pub use config::{Args, BackendKind};
pub use error::ApiError;
