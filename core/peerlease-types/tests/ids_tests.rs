use peerlease_types::{DeviceId, SubscriptionId, UserId};
use std::collections::HashSet;
use std::str::FromStr;

#[test]
fn user_id_roundtrips_through_display() {
    let id = UserId::new(42);
    let parsed = UserId::from_str(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
    assert_eq!(parsed.get(), 42);
}

#[test]
fn id_parse_trims_whitespace() {
    let id: SubscriptionId = " 7 ".parse().unwrap();
    assert_eq!(id, SubscriptionId::new(7));
}

#[test]
fn id_parse_rejects_garbage() {
    let err = DeviceId::from_str("seven").unwrap_err();
    assert!(err.to_string().contains("invalid identifier"));
}

#[test]
fn ids_serialize_as_plain_integers() {
    let json = serde_json::to_string(&DeviceId::new(9)).unwrap();
    assert_eq!(json, "9");
    let back: DeviceId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, DeviceId::new(9));
}

#[test]
fn ids_hash_and_order() {
    let mut set = HashSet::new();
    set.insert(UserId::new(1));
    set.insert(UserId::new(1));
    assert_eq!(set.len(), 1);
    assert!(UserId::new(1) < UserId::new(2));
}
