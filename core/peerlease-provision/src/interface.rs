//! Live WireGuard interface control.
//!
//! The local backend mutates the kernel interface through this trait so the
//! provisioning logic can be exercised against an in-memory interface.

use crate::allocator::InterfaceNetwork;
use crate::error::{ProvisionError, ProvisionResult};
use async_trait::async_trait;
use peerlease_types::PeerKey;
use std::net::Ipv4Addr;
use tokio::process::Command;
use tracing::debug;

/// Operations the local backend needs from a WireGuard interface.
#[async_trait]
pub trait InterfaceControl: Send + Sync {
    /// Interface name (e.g. `wg0`).
    fn name(&self) -> &str;

    /// The interface's own public key.
    async fn public_key(&self) -> ProvisionResult<PeerKey>;

    /// Addresses currently routed to peers of the interface.
    async fn peer_addresses(&self) -> ProvisionResult<Vec<Ipv4Addr>>;

    /// The interface's IPv4 address and prefix, if it has one.
    async fn network(&self) -> ProvisionResult<Option<InterfaceNetwork>>;

    /// Adds a peer, or replaces its allowed address if it already exists.
    async fn upsert_peer(&self, key: &PeerKey, address: Ipv4Addr) -> ProvisionResult<()>;

    async fn remove_peer(&self, key: &PeerKey) -> ProvisionResult<()>;

    /// Writes the running configuration back to the interface's config file.
    async fn persist(&self) -> ProvisionResult<()>;
}

// ── wg / ip command implementation ──────────────────────────────

/// Drives a kernel interface through the `wg`, `ip` and `wg-quick` tools.
#[derive(Debug, Clone)]
pub struct WgCommandInterface {
    name: String,
}

impl WgCommandInterface {
    /// Checks that `name` is a WireGuard interface on this host.
    pub async fn connect(name: impl Into<String>) -> ProvisionResult<Self> {
        let name = name.into();
        validate_interface_name(&name)?;
        let listed = run("wg", &["show", "interfaces"])
            .await
            .map_err(|e| ProvisionError::FatalStartup(format!("cannot list interfaces: {e}")))?;
        let available: Vec<&str> = listed.split_whitespace().collect();
        if !available.contains(&name.as_str()) {
            return Err(ProvisionError::FatalStartup(format!(
                "WireGuard interface '{name}' not found (available: {available:?})"
            )));
        }
        Ok(Self { name })
    }
}

#[async_trait]
impl InterfaceControl for WgCommandInterface {
    fn name(&self) -> &str {
        &self.name
    }

    async fn public_key(&self) -> ProvisionResult<PeerKey> {
        let out = run("wg", &["show", &self.name, "public-key"]).await?;
        PeerKey::parse(out.trim()).map_err(|e| {
            ProvisionError::TransientBackend(format!("unexpected public key from wg: {e}"))
        })
    }

    async fn peer_addresses(&self) -> ProvisionResult<Vec<Ipv4Addr>> {
        let out = run("wg", &["show", &self.name, "allowed-ips"]).await?;
        Ok(parse_allowed_ips(&out))
    }

    async fn network(&self) -> ProvisionResult<Option<InterfaceNetwork>> {
        let out = run("ip", &["-o", "-4", "addr", "show", "dev", &self.name]).await?;
        Ok(parse_inet(&out))
    }

    async fn upsert_peer(&self, key: &PeerKey, address: Ipv4Addr) -> ProvisionResult<()> {
        let key = key.to_base64();
        let allowed = format!("{address}/32");
        run("wg", &["set", &self.name, "peer", &key, "allowed-ips", &allowed]).await?;
        Ok(())
    }

    async fn remove_peer(&self, key: &PeerKey) -> ProvisionResult<()> {
        let key = key.to_base64();
        run("wg", &["set", &self.name, "peer", &key, "remove"]).await?;
        Ok(())
    }

    async fn persist(&self) -> ProvisionResult<()> {
        run("wg-quick", &["save", &self.name]).await?;
        Ok(())
    }
}

async fn run(program: &str, args: &[&str]) -> ProvisionResult<String> {
    debug!("Running {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| ProvisionError::TransientBackend(format!("failed to run {program}: {e}")))?;
    if !output.status.success() {
        return Err(ProvisionError::TransientBackend(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn validate_interface_name(name: &str) -> ProvisionResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 15
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ProvisionError::FatalStartup(format!(
            "invalid interface name {name:?}"
        )))
    }
}

/// Extracts the IPv4 addresses from `wg show <iface> allowed-ips` output.
///
/// Each line is a peer key followed by its allowed networks; IPv6 entries
/// and `(none)` are ignored.
pub fn parse_allowed_ips(output: &str) -> Vec<Ipv4Addr> {
    output
        .lines()
        .flat_map(|line| line.split_whitespace().skip(1))
        .filter_map(|cidr| cidr.split('/').next())
        .filter_map(|ip| ip.parse::<Ipv4Addr>().ok())
        .collect()
}

/// Extracts the first `inet a.b.c.d/n` from `ip -o -4 addr show` output.
pub fn parse_inet(output: &str) -> Option<InterfaceNetwork> {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token != "inet" {
            continue;
        }
        let (ip, prefix) = tokens.next()?.split_once('/')?;
        return InterfaceNetwork::new(ip.parse().ok()?, prefix.parse().ok()?);
    }
    None
}

/// An in-memory interface for tests and the development backend.
pub mod mock {
    use super::*;
    use crate::keys::KeyPair;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct State {
        peers: HashMap<PeerKey, Ipv4Addr>,
        persist_count: usize,
        fail_mutations: bool,
        fail_reads: bool,
    }

    /// Interface state held in a map; mutations can be made to fail.
    #[derive(Debug)]
    pub struct MemoryInterface {
        name: String,
        public_key: PeerKey,
        network: Option<InterfaceNetwork>,
        state: Mutex<State>,
    }

    impl MemoryInterface {
        /// Creates an interface with a random server key.
        pub fn new(name: impl Into<String>, network: Option<InterfaceNetwork>) -> Self {
            Self {
                name: name.into(),
                public_key: KeyPair::generate().public_key(),
                network,
                state: Mutex::new(State::default()),
            }
        }

        /// Makes every subsequent upsert, remove and persist fail.
        pub fn fail_mutations(&self, fail: bool) {
            self.with_state(|s| s.fail_mutations = fail);
        }

        /// Makes peer and network reads fail, as when `wg show` errors.
        pub fn fail_reads(&self, fail: bool) {
            self.with_state(|s| s.fail_reads = fail);
        }

        /// Adds a peer directly, bypassing failure injection.
        pub fn seed_peer(&self, key: PeerKey, address: Ipv4Addr) {
            self.with_state(|s| {
                s.peers.insert(key, address);
            });
        }

        pub fn peer(&self, key: &PeerKey) -> Option<Ipv4Addr> {
            self.with_state(|s| s.peers.get(key).copied())
        }

        pub fn peer_count(&self) -> usize {
            self.with_state(|s| s.peers.len())
        }

        pub fn persist_count(&self) -> usize {
            self.with_state(|s| s.persist_count)
        }

        fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            f(&mut state)
        }

        fn read<T>(&self, op: &str, f: impl FnOnce(&State) -> T) -> ProvisionResult<T> {
            self.with_state(|s| {
                if s.fail_reads {
                    Err(ProvisionError::TransientBackend(format!(
                        "{op} {} failed (injected)",
                        self.name
                    )))
                } else {
                    Ok(f(s))
                }
            })
        }

        fn mutate<T>(&self, op: &str, f: impl FnOnce(&mut State) -> T) -> ProvisionResult<T> {
            self.with_state(|s| {
                if s.fail_mutations {
                    Err(ProvisionError::TransientBackend(format!(
                        "{op} on {} failed (injected)",
                        self.name
                    )))
                } else {
                    Ok(f(s))
                }
            })
        }
    }

    #[async_trait]
    impl InterfaceControl for MemoryInterface {
        fn name(&self) -> &str {
            &self.name
        }

        async fn public_key(&self) -> ProvisionResult<PeerKey> {
            Ok(self.public_key)
        }

        async fn peer_addresses(&self) -> ProvisionResult<Vec<Ipv4Addr>> {
            self.read("wg show", |s| s.peers.values().copied().collect())
        }

        async fn network(&self) -> ProvisionResult<Option<InterfaceNetwork>> {
            let network = self.network;
            self.read("ip addr show", |_| network)
        }

        async fn upsert_peer(&self, key: &PeerKey, address: Ipv4Addr) -> ProvisionResult<()> {
            self.mutate("upsert", |s| {
                s.peers.insert(*key, address);
            })
        }

        async fn remove_peer(&self, key: &PeerKey) -> ProvisionResult<()> {
            self.mutate("remove", |s| {
                s.peers.remove(key);
            })
        }

        async fn persist(&self) -> ProvisionResult<()> {
            self.mutate("persist", |s| s.persist_count += 1)
        }
    }
}
