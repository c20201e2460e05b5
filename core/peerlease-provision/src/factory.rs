//! Backend selection.

use crate::allocator::InterfaceNetwork;
use crate::channel::{SshChannel, SshConfig};
use crate::error::ProvisionResult;
use crate::interface::WgCommandInterface;
use crate::interface::mock::MemoryInterface;
use crate::local::LocalProvisioner;
use crate::provisioner::Provisioner;
use crate::remote::RemoteProvisioner;
use peerlease_db::PeerDirectory;
use std::sync::Arc;
use tracing::{info, warn};

/// Settings for the local interface backend.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub interface: String,
    /// `host:port` written into client configurations.
    pub endpoint: String,
    pub dns: Vec<String>,
}

/// Settings for the in-memory development backend.
#[derive(Debug, Clone)]
pub struct DevConfig {
    pub network: InterfaceNetwork,
    pub endpoint: String,
    pub dns: Vec<String>,
}

/// Which provisioning backend to run.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Local(LocalConfig),
    Remote(SshConfig),
    /// Local backend over an in-memory interface. Touches no real network.
    Dev(DevConfig),
}

/// Builds the configured backend.
pub async fn build_provisioner(
    config: BackendConfig,
    directory: PeerDirectory,
) -> ProvisionResult<Arc<dyn Provisioner>> {
    match config {
        BackendConfig::Local(local) => {
            let interface = WgCommandInterface::connect(local.interface).await?;
            let provisioner =
                LocalProvisioner::new(Arc::new(interface), directory, local.endpoint, local.dns)
                    .await?;
            Ok(Arc::new(provisioner))
        }
        BackendConfig::Remote(ssh) => {
            info!("Using remote provisioning host {}:{}", ssh.host, ssh.port);
            let channel = SshChannel::new(ssh)?;
            Ok(Arc::new(RemoteProvisioner::new(channel, directory)))
        }
        BackendConfig::Dev(dev) => {
            warn!("Development backend: peers are not applied to any real interface");
            let interface = MemoryInterface::new("dev0", Some(dev.network));
            let provisioner =
                LocalProvisioner::new(Arc::new(interface), directory, dev.endpoint, dev.dns)
                    .await?;
            Ok(Arc::new(provisioner))
        }
    }
}
