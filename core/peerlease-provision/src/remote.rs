//! Backend that delegates peer management to a remote host.
//!
//! The remote host owns the interface and picks the address; this side
//! generates keys, records devices and renders client configurations.

use crate::channel::{RemoteChannel, check_argument};
use crate::client_config::{ClientConfig, split_dns};
use crate::error::{ErrorKind, ProvisionError, ProvisionResult};
use crate::keys::KeyPair;
use crate::provisioner::{
    ProvisionedPeer, Provisioner, blocking, parse_public_key, validate_device_name,
};
use async_trait::async_trait;
use peerlease_db::{DbError, NewDevice, PeerDirectory};
use peerlease_types::{PeerKey, SubscriptionId, UserId};
use serde::Deserialize;
use std::net::Ipv4Addr;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct CreateResponse {
    assigned_ip: String,
    server_public_key: String,
    endpoint: String,
    dns: String,
}

impl CreateResponse {
    fn check(&self) -> ProvisionResult<()> {
        for (field, value) in [
            ("assigned_ip", &self.assigned_ip),
            ("server_public_key", &self.server_public_key),
            ("endpoint", &self.endpoint),
            ("dns", &self.dns),
        ] {
            if value.trim().is_empty() {
                return Err(ProvisionError::Validation(format!(
                    "remote response field {field} is empty"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RevokeResponse {
    ok: bool,
}

/// Provisions peers through a [`RemoteChannel`].
pub struct RemoteProvisioner<C> {
    channel: C,
    directory: PeerDirectory,
}

impl<C: RemoteChannel> RemoteProvisioner<C> {
    pub fn new(channel: C, directory: PeerDirectory) -> Self {
        Self { channel, directory }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    async fn create(
        &self,
        public_key: PeerKey,
        private_key: Option<&str>,
        user: UserId,
        subscription: SubscriptionId,
        device_name: &str,
    ) -> ProvisionResult<ProvisionedPeer> {
        validate_device_name(device_name)?;

        let directory = self.directory.clone();
        blocking(move || {
            directory.transaction(|tx| {
                if let Some(existing) = tx.active_device_by_key(&public_key)? {
                    return Err(ProvisionError::Conflict(format!(
                        "public key already belongs to device {}",
                        existing.id
                    )));
                }
                let sub = tx.subscription_by_id(subscription)?.ok_or_else(|| {
                    ProvisionError::NotFound(format!("subscription {subscription}"))
                })?;
                let current = tx.count_active_devices(subscription)?;
                if current >= sub.device_limit {
                    return Err(DbError::DeviceLimit {
                        current,
                        limit: sub.device_limit,
                    }
                    .into());
                }
                Ok(())
            })
        })
        .await?;

        let args = vec![
            "create".to_string(),
            "--user-id".to_string(),
            user.to_string(),
            "--subscription-id".to_string(),
            subscription.to_string(),
            "--device-name".to_string(),
            device_name.to_string(),
            "--public-key".to_string(),
            public_key.to_base64(),
        ];
        let body = self.send(&args).await?;
        let response: CreateResponse = serde_json::from_slice(&body).map_err(|e| {
            ProvisionError::Validation(format!("malformed create response: {e}"))
        })?;
        response.check()?;
        let assigned_address = normalize_address(&response.assigned_ip)?;
        let server_key = parse_public_key(&response.server_public_key)?;

        let directory = self.directory.clone();
        let new = NewDevice {
            user_id: user,
            subscription_id: subscription,
            name: device_name.to_string(),
            public_key,
            assigned_address,
        };
        let device = match blocking(move || Ok(directory.create_device(&new)?)).await {
            Ok(device) => device,
            Err(e) => {
                warn!(
                    "Remote peer {} at {} created but not recorded: {}",
                    public_key, assigned_address, e
                );
                // Only a lost limit race leaves the address free of other devices.
                if e.kind() == ErrorKind::LimitReached {
                    if let Err(undo) = self.revoke_address(assigned_address).await {
                        warn!(
                            "Failed to remove unrecorded remote peer at {}: {}",
                            assigned_address, undo
                        );
                    }
                }
                return Err(e);
            }
        };

        let dns = split_dns(&response.dns);
        let server_key = server_key.to_base64();
        let config = ClientConfig {
            private_key,
            address: assigned_address,
            dns: &dns,
            server_public_key: &server_key,
            endpoint: response.endpoint.trim(),
        }
        .render();

        info!(
            "Provisioned remote device {} for user {} at {}",
            device.id, user, assigned_address
        );
        Ok(ProvisionedPeer {
            device_id: device.id,
            config,
            public_key,
            assigned_address,
        })
    }

    async fn revoke_address(&self, address: Ipv4Addr) -> ProvisionResult<()> {
        let args = vec![
            "revoke".to_string(),
            "--assigned-ip".to_string(),
            address.to_string(),
        ];
        let body = self.send(&args).await?;
        let response: RevokeResponse = serde_json::from_slice(&body).map_err(|e| {
            ProvisionError::Validation(format!("malformed revoke response: {e}"))
        })?;
        if !response.ok {
            return Err(ProvisionError::TransientBackend(format!(
                "remote host refused to revoke {address}"
            )));
        }
        Ok(())
    }

    async fn send(&self, args: &[String]) -> ProvisionResult<Vec<u8>> {
        for arg in args {
            check_argument(arg)?;
        }
        self.channel.execute(args).await
    }
}

#[async_trait]
impl<C: RemoteChannel> Provisioner for RemoteProvisioner<C> {
    async fn create_with_generated_key(
        &self,
        user: UserId,
        subscription: SubscriptionId,
        device_name: &str,
    ) -> ProvisionResult<ProvisionedPeer> {
        let pair = KeyPair::generate();
        self.create(
            pair.public_key(),
            Some(pair.private_key()),
            user,
            subscription,
            device_name,
        )
        .await
    }

    async fn create_with_supplied_key(
        &self,
        public_key: &str,
        user: UserId,
        subscription: SubscriptionId,
        device_name: &str,
    ) -> ProvisionResult<ProvisionedPeer> {
        let key = parse_public_key(public_key)?;
        self.create(key, None, user, subscription, device_name).await
    }

    async fn revoke(&self, public_key: &str) -> ProvisionResult<()> {
        let key = parse_public_key(public_key)?;
        let directory = self.directory.clone();
        let device = blocking(move || Ok(directory.active_device_by_key(&key)?))
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("no active device with key {key}")))?;

        self.revoke_address(device.assigned_address).await?;
        info!("Revoked remote peer {} at {}", key, device.assigned_address);
        Ok(())
    }

    async fn close(&self) -> ProvisionResult<()> {
        self.channel.close().await
    }
}

/// Parses a remote address, accepting an optional `/32` suffix.
pub fn normalize_address(raw: &str) -> ProvisionResult<Ipv4Addr> {
    let raw = raw.trim();
    let ip = match raw.split_once('/') {
        Some((ip, "32")) => ip,
        Some((_, prefix)) => {
            return Err(ProvisionError::Validation(format!(
                "assigned address {raw} has prefix /{prefix}, expected /32"
            )));
        }
        None => raw,
    };
    ip.parse::<Ipv4Addr>().map_err(|e| {
        ProvisionError::Validation(format!("assigned address {raw:?} is not IPv4: {e}"))
    })
}
