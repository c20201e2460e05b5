//! Backend that manages a WireGuard interface on this host.

use crate::allocator::{self, AddressAnchor};
use crate::client_config::ClientConfig;
use crate::error::{ProvisionError, ProvisionResult};
use crate::interface::InterfaceControl;
use crate::keys::KeyPair;
use crate::provisioner::{
    ProvisionedPeer, Provisioner, blocking, parse_public_key, validate_device_name,
};
use async_trait::async_trait;
use peerlease_db::{NewDevice, PeerDirectory};
use peerlease_types::{PeerKey, SubscriptionId, UserId};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{info, warn};

/// Provisions peers on a local interface, allocating addresses from the
/// directory.
///
/// The directory commit is the point of no return. Interface updates after
/// it are best effort: a failure is logged and the caller still receives a
/// usable configuration.
pub struct LocalProvisioner<I> {
    interface: Arc<I>,
    directory: PeerDirectory,
    server_public_key: PeerKey,
    endpoint: String,
    dns: Vec<String>,
}

impl<I: InterfaceControl + 'static> LocalProvisioner<I> {
    /// Reads the interface's public key and validates the client settings.
    pub async fn new(
        interface: Arc<I>,
        directory: PeerDirectory,
        endpoint: impl Into<String>,
        dns: Vec<String>,
    ) -> ProvisionResult<Self> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(ProvisionError::FatalStartup(
                "server endpoint is required".to_string(),
            ));
        }
        validate_dns(&dns)?;
        let server_public_key = interface.public_key().await.map_err(|e| {
            ProvisionError::FatalStartup(format!(
                "cannot read public key of {}: {e}",
                interface.name()
            ))
        })?;
        info!("Using WireGuard interface {}", interface.name());
        Ok(Self {
            interface,
            directory,
            server_public_key,
            endpoint,
            dns,
        })
    }

    pub fn interface(&self) -> &Arc<I> {
        &self.interface
    }

    /// Interface state that seeds allocation when the ledger is empty.
    /// Read failures leave the corresponding part unknown.
    async fn anchor(&self) -> AddressAnchor {
        let peer_addresses = self.interface.peer_addresses().await.unwrap_or_else(|e| {
            warn!("Cannot read peers of {}: {}", self.interface.name(), e);
            Vec::new()
        });
        let network = self.interface.network().await.unwrap_or_else(|e| {
            warn!("Cannot read network of {}: {}", self.interface.name(), e);
            None
        });
        AddressAnchor {
            peer_addresses,
            network,
        }
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
        let anchor = self.anchor().await;

        let directory = self.directory.clone();
        let name = device_name.to_string();
        let device = blocking(move || {
            directory.transaction(|tx| {
                if let Some(existing) = tx.active_device_by_key(&public_key)? {
                    return Err(ProvisionError::Conflict(format!(
                        "public key already belongs to device {}",
                        existing.id
                    )));
                }
                let assigned_address = allocator::next_address(tx, &anchor)?;
                Ok(tx.insert_device(&NewDevice {
                    user_id: user,
                    subscription_id: subscription,
                    name,
                    public_key,
                    assigned_address,
                })?)
            })
        })
        .await?;

        if let Err(e) = self.apply_peer(&public_key, device.assigned_address).await {
            warn!(
                "Device {} committed but interface {} not updated: {}",
                device.id,
                self.interface.name(),
                e
            );
        }

        let server_key = self.server_public_key.to_base64();
        let config = ClientConfig {
            private_key,
            address: device.assigned_address,
            dns: &self.dns,
            server_public_key: &server_key,
            endpoint: &self.endpoint,
        }
        .render();

        info!(
            "Provisioned device {} for user {} at {}",
            device.id, user, device.assigned_address
        );
        Ok(ProvisionedPeer {
            device_id: device.id,
            config,
            public_key,
            assigned_address: device.assigned_address,
        })
    }

    async fn apply_peer(&self, key: &PeerKey, address: Ipv4Addr) -> ProvisionResult<()> {
        self.interface.upsert_peer(key, address).await?;
        self.interface.persist().await
    }
}

#[async_trait]
impl<I: InterfaceControl + 'static> Provisioner for LocalProvisioner<I> {
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
        self.interface.remove_peer(&key).await?;
        self.interface.persist().await?;
        info!("Removed peer {} from {}", key, self.interface.name());
        Ok(())
    }

    async fn close(&self) -> ProvisionResult<()> {
        info!("Closing local provisioner for {}", self.interface.name());
        Ok(())
    }
}

/// Requires at least one DNS entry, each an IP address.
pub fn validate_dns(dns: &[String]) -> ProvisionResult<()> {
    if dns.is_empty() {
        return Err(ProvisionError::FatalStartup(
            "at least one DNS server is required".to_string(),
        ));
    }
    for entry in dns {
        if entry.parse::<IpAddr>().is_err() {
            return Err(ProvisionError::FatalStartup(format!(
                "invalid DNS address: {entry}"
            )));
        }
    }
    Ok(())
}
