//! The provisioner boundary shared by every backend.

use crate::error::{ProvisionError, ProvisionResult};
use async_trait::async_trait;
use peerlease_db::DbError;
use peerlease_types::{DeviceId, PeerKey, SubscriptionId, UserId};
use std::fmt;
use std::net::Ipv4Addr;

/// Longest accepted device name, in characters.
pub const MAX_DEVICE_NAME_CHARS: usize = 64;

/// The result of provisioning one device.
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisionedPeer {
    pub device_id: DeviceId,
    /// Rendered client configuration. Contains the private key when the key
    /// pair was generated here.
    pub config: Vec<u8>,
    pub public_key: PeerKey,
    pub assigned_address: Ipv4Addr,
}

impl fmt::Debug for ProvisionedPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionedPeer")
            .field("device_id", &self.device_id)
            .field("config", &format_args!("<{} bytes>", self.config.len()))
            .field("public_key", &self.public_key)
            .field("assigned_address", &self.assigned_address)
            .finish()
    }
}

/// Creates and revokes WireGuard peers.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Generates a key pair and provisions a device for it.
    async fn create_with_generated_key(
        &self,
        user: UserId,
        subscription: SubscriptionId,
        device_name: &str,
    ) -> ProvisionResult<ProvisionedPeer>;

    /// Provisions a device for a client-supplied public key.
    async fn create_with_supplied_key(
        &self,
        public_key: &str,
        user: UserId,
        subscription: SubscriptionId,
        device_name: &str,
    ) -> ProvisionResult<ProvisionedPeer>;

    /// Removes the peer from the backend. The directory row is left as is.
    async fn revoke(&self, public_key: &str) -> ProvisionResult<()>;

    async fn close(&self) -> ProvisionResult<()>;
}

/// Checks a device name: 1 to 64 characters, none of them control characters.
pub fn validate_device_name(name: &str) -> ProvisionResult<()> {
    let len = name.chars().count();
    if len == 0 || len > MAX_DEVICE_NAME_CHARS {
        return Err(ProvisionError::Validation(format!(
            "device name must be 1-{MAX_DEVICE_NAME_CHARS} characters, got {len}"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(ProvisionError::Validation(
            "device name contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// Parses a client-supplied base64 public key.
pub fn parse_public_key(key: &str) -> ProvisionResult<PeerKey> {
    PeerKey::parse(key.trim()).map_err(|e| ProvisionError::Validation(e.to_string()))
}

/// Runs blocking directory work off the async executor.
pub(crate) async fn blocking<T, F>(f: F) -> ProvisionResult<T>
where
    F: FnOnce() -> ProvisionResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        ProvisionError::Directory(DbError::Storage(format!("directory task failed: {e}")))
    })?
}
