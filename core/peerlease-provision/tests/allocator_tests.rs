//! Tests for address allocation arithmetic and fallbacks.

use peerlease_provision::allocator::{next_after, successor};
use peerlease_provision::{AddressAnchor, AllocationError, InterfaceNetwork};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::net::Ipv4Addr;

fn net(a: u8, b: u8, c: u8, d: u8, prefix: u8) -> InterfaceNetwork {
    InterfaceNetwork::new(Ipv4Addr::new(a, b, c, d), prefix).unwrap()
}

// ── Fallback order ──────────────────────────────────────────────

#[test]
fn ledger_maximum_wins_over_interface() {
    let anchor = AddressAnchor {
        peer_addresses: vec![Ipv4Addr::new(10, 8, 0, 200)],
        network: Some(net(10, 8, 0, 1, 24)),
    };
    let ledger = [Ipv4Addr::new(10, 8, 0, 5), Ipv4Addr::new(10, 8, 0, 3)];
    assert_eq!(next_after(&ledger, &anchor).unwrap(), Ipv4Addr::new(10, 8, 0, 6));
}

#[test]
fn addresses_compare_numerically_not_lexically() {
    let ledger = [Ipv4Addr::new(10, 8, 0, 9), Ipv4Addr::new(10, 8, 0, 10)];
    let anchor = AddressAnchor::default();
    assert_eq!(next_after(&ledger, &anchor).unwrap(), Ipv4Addr::new(10, 8, 0, 11));
}

#[test]
fn empty_ledger_falls_back_to_interface_peers() {
    let anchor = AddressAnchor {
        peer_addresses: vec![Ipv4Addr::new(10, 8, 0, 7), Ipv4Addr::new(10, 8, 0, 40)],
        network: Some(net(10, 8, 0, 1, 24)),
    };
    assert_eq!(next_after(&[], &anchor).unwrap(), Ipv4Addr::new(10, 8, 0, 41));
}

#[test]
fn no_peers_falls_back_to_interface_address() {
    let anchor = AddressAnchor {
        peer_addresses: vec![],
        network: Some(net(10, 8, 0, 1, 24)),
    };
    assert_eq!(next_after(&[], &anchor).unwrap(), Ipv4Addr::new(10, 8, 0, 2));
}

#[test]
fn nothing_known_is_undeterminable() {
    let err = next_after(&[], &AddressAnchor::default()).unwrap_err();
    assert_eq!(err, AllocationError::Undeterminable);
}

// ── Pool bounds ─────────────────────────────────────────────────

#[test]
fn broadcast_address_is_never_assigned() {
    let last = Ipv4Addr::new(10, 8, 0, 254);
    let err = successor(last, Some(net(10, 8, 0, 1, 24))).unwrap_err();
    assert_eq!(err, AllocationError::Exhausted { last });
}

#[test]
fn leaving_the_network_is_exhaustion() {
    let last = Ipv4Addr::new(10, 8, 0, 255);
    assert!(successor(last, Some(net(10, 8, 0, 1, 24))).is_err());
}

#[test]
fn top_of_address_space_does_not_wrap() {
    let last = Ipv4Addr::new(255, 255, 255, 255);
    assert_eq!(
        successor(last, None).unwrap_err(),
        AllocationError::Exhausted { last }
    );
}

#[test]
fn octet_carry_without_network_bound() {
    assert_eq!(
        successor(Ipv4Addr::new(10, 8, 0, 255), None).unwrap(),
        Ipv4Addr::new(10, 8, 1, 0)
    );
}

#[test]
fn network_helpers() {
    let n = net(192, 168, 7, 1, 22);
    assert_eq!(n.broadcast(), Ipv4Addr::new(192, 168, 7, 255));
    assert!(n.contains(Ipv4Addr::new(192, 168, 4, 0)));
    assert!(!n.contains(Ipv4Addr::new(192, 168, 8, 0)));
    assert_eq!(n.to_string(), "192.168.7.1/22");
    assert!(InterfaceNetwork::new(Ipv4Addr::LOCALHOST, 33).is_none());
}

proptest! {
    #[test]
    fn successor_is_plus_one_when_unbounded(raw in 0u32..u32::MAX) {
        let next = successor(Ipv4Addr::from(raw), None).unwrap();
        prop_assert_eq!(u32::from(next), raw + 1);
    }

    #[test]
    fn successor_stays_inside_network(host in 1u32..250, prefix in 16u8..=24) {
        let network = InterfaceNetwork::new(Ipv4Addr::new(10, 8, 0, 1), prefix).unwrap();
        let last = Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 8, 0, 0)) + host);
        let next = successor(last, Some(network)).unwrap();
        prop_assert!(network.contains(next));
        prop_assert_ne!(next, network.broadcast());
    }
}
