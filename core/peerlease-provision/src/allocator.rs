//! Address allocation.
//!
//! The next address is one past the numerically greatest address in use.
//! "In use" is read from the ledger first; the live interface is only
//! consulted when the ledger holds no active device.

use crate::error::{AllocationError, ProvisionResult};
use peerlease_db::DirectoryTx;
use std::fmt;
use std::net::Ipv4Addr;

/// An interface's own address together with its prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceNetwork {
    address: Ipv4Addr,
    prefix_len: u8,
}

impl InterfaceNetwork {
    /// Returns `None` for prefixes longer than 32 bits.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Option<Self> {
        (prefix_len <= 32).then_some(Self {
            address,
            prefix_len,
        })
    }

    /// The interface's own address.
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    fn mask(&self) -> u32 {
        match self.prefix_len {
            0 => 0,
            n => u32::MAX << (32 - u32::from(n)),
        }
    }

    /// True if `addr` lies inside the network.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == u32::from(self.address) & self.mask()
    }

    /// The all-ones host address of the network.
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) | !self.mask())
    }
}

impl fmt::Display for InterfaceNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

/// Live-interface state captured just before the allocation transaction.
#[derive(Debug, Clone, Default)]
pub struct AddressAnchor {
    /// Addresses currently configured on interface peers.
    pub peer_addresses: Vec<Ipv4Addr>,
    /// The interface's own network, when it could be read.
    pub network: Option<InterfaceNetwork>,
}

/// Picks the next free address inside the caller's transaction.
pub fn next_address(tx: &DirectoryTx<'_>, anchor: &AddressAnchor) -> ProvisionResult<Ipv4Addr> {
    let ledger = tx.active_addresses()?;
    Ok(next_after(&ledger, anchor)?)
}

/// The pure part of [`next_address`]: given the ledger's active addresses.
pub fn next_after(ledger: &[Ipv4Addr], anchor: &AddressAnchor) -> Result<Ipv4Addr, AllocationError> {
    let last = highest(ledger)
        .or_else(|| highest(&anchor.peer_addresses))
        .or(anchor.network.map(|n| n.address()))
        .ok_or(AllocationError::Undeterminable)?;
    successor(last, anchor.network)
}

/// Returns `last + 1`, bounded by the network when one is known.
pub fn successor(
    last: Ipv4Addr,
    network: Option<InterfaceNetwork>,
) -> Result<Ipv4Addr, AllocationError> {
    let next = u32::from(last)
        .checked_add(1)
        .map(Ipv4Addr::from)
        .ok_or(AllocationError::Exhausted { last })?;
    if let Some(network) = network {
        if !network.contains(next) || next == network.broadcast() {
            return Err(AllocationError::Exhausted { last });
        }
    }
    Ok(next)
}

fn highest(addrs: &[Ipv4Addr]) -> Option<Ipv4Addr> {
    addrs.iter().copied().max_by_key(|a| u32::from(*a))
}
