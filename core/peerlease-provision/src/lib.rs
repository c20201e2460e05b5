//! WireGuard peer provisioning for peerlease.
//!
//! Two backends implement [`Provisioner`]:
//! - [`LocalProvisioner`] allocates addresses from the directory and manages
//!   a WireGuard interface on this host
//! - [`RemoteProvisioner`] delegates to an allow-listed command on a remote
//!   host that owns the interface
//!
//! [`build_provisioner`] selects one from a [`BackendConfig`].

pub mod allocator;
pub mod channel;
pub mod client_config;
mod error;
mod factory;
pub mod interface;
pub mod keys;
mod local;
mod provisioner;
mod remote;

pub use allocator::{AddressAnchor, InterfaceNetwork};
pub use channel::{RemoteChannel, SshChannel, SshConfig};
pub use error::{AllocationError, ErrorKind, ProvisionError, ProvisionResult};
pub use factory::{BackendConfig, DevConfig, LocalConfig, build_provisioner};
pub use interface::{InterfaceControl, WgCommandInterface};
pub use local::{LocalProvisioner, validate_dns};
pub use provisioner::{
    MAX_DEVICE_NAME_CHARS, ProvisionedPeer, Provisioner, parse_public_key, validate_device_name,
};
pub use remote::{RemoteProvisioner, normalize_address};
