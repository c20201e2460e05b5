//! Command line and environment configuration.

use clap::{Parser, ValueEnum};
use peerlease_provision::{
    BackendConfig, DevConfig, InterfaceNetwork, LocalConfig, ProvisionError, ProvisionResult,
    SshConfig,
};
use peerlease_scheduler::SchedulerConfig;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Manage a WireGuard interface on this host.
    Local,
    /// Delegate to a remote host over SSH.
    Remote,
    /// In-memory interface for development.
    Dev,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "peerlease")]
#[command(about = "WireGuard peer provisioning with subscription lifecycle")]
pub struct Args {
    /// SQLite database path
    #[arg(long, env = "PEERLEASE_DATABASE", default_value = "peerlease.db")]
    pub database: PathBuf,

    /// Address for the admin HTTP API
    #[arg(long, env = "PEERLEASE_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Provisioning backend
    #[arg(long, env = "PEERLEASE_BACKEND", value_enum, default_value = "local")]
    pub backend: BackendKind,

    /// WireGuard interface (local backend)
    #[arg(long, env = "WIREGUARD_INTERFACE", default_value = "wg0")]
    pub interface: String,

    /// `host:port` clients connect to (local and dev backends)
    #[arg(long, env = "SERVER_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Comma-separated DNS servers for client configurations
    #[arg(long, env = "DNS_IPS", value_delimiter = ',', default_value = "1.1.1.1")]
    pub dns: Vec<String>,

    /// Address pool for the dev backend, as `address/prefix`
    #[arg(long, env = "PEERLEASE_DEV_NETWORK", default_value = "10.8.0.1/24")]
    pub dev_network: String,

    /// Remote provisioning host
    #[arg(long, env = "SSH_WG_HOST")]
    pub ssh_host: Option<String>,

    #[arg(long, env = "SSH_WG_PORT", default_value = "22")]
    pub ssh_port: u16,

    #[arg(long, env = "SSH_WG_USER", default_value = "root")]
    pub ssh_user: String,

    #[arg(long, env = "SSH_WG_KEY_PATH")]
    pub ssh_key_path: Option<PathBuf>,

    /// Pins the remote host key against this file
    #[arg(long, env = "SSH_WG_KNOWN_HOSTS")]
    pub ssh_known_hosts: Option<PathBuf>,

    /// Control socket for SSH connection reuse
    #[arg(long, env = "SSH_WG_CONTROL_PATH")]
    pub ssh_control_path: Option<PathBuf>,

    /// Remote command that manages peers
    #[arg(long, env = "SSH_WG_COMMAND")]
    pub ssh_command: Option<String>,

    /// Admin API tokens, `name:token` or a bare token, comma-separated
    #[arg(long, env = "PEERLEASE_ADMIN_TOKENS", value_delimiter = ',')]
    pub admin_tokens: Vec<String>,

    /// Seconds between scheduler runs
    #[arg(long, env = "PEERLEASE_SCHEDULER_PERIOD", default_value = "86400")]
    pub scheduler_period_secs: u64,

    /// Hard limit for one scheduler run, in seconds
    #[arg(long, env = "PEERLEASE_SCHEDULER_BUDGET", default_value = "300")]
    pub scheduler_budget_secs: u64,

    /// Days after the grace period before devices are cleaned up
    #[arg(long, env = "PEERLEASE_CLEANUP_DAYS", default_value = "30")]
    pub cleanup_days: u32,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Builds the backend selection, rejecting incomplete settings.
    pub fn backend_config(&self) -> ProvisionResult<BackendConfig> {
        match self.backend {
            BackendKind::Local => Ok(BackendConfig::Local(LocalConfig {
                interface: self.interface.clone(),
                endpoint: self.require_endpoint()?,
                dns: self.dns_entries(),
            })),
            BackendKind::Dev => Ok(BackendConfig::Dev(DevConfig {
                network: parse_network(&self.dev_network)?,
                endpoint: self.require_endpoint()?,
                dns: self.dns_entries(),
            })),
            BackendKind::Remote => {
                let host = self
                    .ssh_host
                    .as_deref()
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| {
                        ProvisionError::FatalStartup(
                            "SSH_WG_HOST is required for the remote backend".to_string(),
                        )
                    })?;
                let key_path = self.ssh_key_path.clone().ok_or_else(|| {
                    ProvisionError::FatalStartup(
                        "SSH_WG_KEY_PATH is required for the remote backend".to_string(),
                    )
                })?;
                let mut ssh = SshConfig::new(host, self.ssh_user.clone(), key_path);
                ssh.port = self.ssh_port;
                ssh.known_hosts = self.ssh_known_hosts.clone();
                ssh.control_path = self.ssh_control_path.clone();
                if let Some(command) = &self.ssh_command {
                    ssh.command = command.clone();
                }
                Ok(BackendConfig::Remote(ssh))
            }
        }
    }

    pub fn scheduler_config(&self) -> ProvisionResult<SchedulerConfig> {
        if self.scheduler_period_secs == 0 || self.scheduler_budget_secs == 0 {
            return Err(ProvisionError::FatalStartup(
                "scheduler period and budget must be positive".to_string(),
            ));
        }
        Ok(SchedulerConfig {
            period: Duration::from_secs(self.scheduler_period_secs),
            run_budget: Duration::from_secs(self.scheduler_budget_secs),
            cleanup_after: chrono::Duration::days(i64::from(self.cleanup_days)),
        })
    }

    fn require_endpoint(&self) -> ProvisionResult<String> {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ProvisionError::FatalStartup(format!(
                    "SERVER_ENDPOINT is required for the {:?} backend",
                    self.backend
                ))
            })
    }

    fn dns_entries(&self) -> Vec<String> {
        self.dns
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect()
    }
}

/// Parses `address/prefix`, e.g. `10.8.0.1/24`.
pub fn parse_network(raw: &str) -> ProvisionResult<InterfaceNetwork> {
    let invalid = || ProvisionError::FatalStartup(format!("invalid network: {raw:?}"));
    let (address, prefix) = raw.trim().split_once('/').ok_or_else(invalid)?;
    let address: Ipv4Addr = address.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    InterfaceNetwork::new(address, prefix).ok_or_else(invalid)
}
