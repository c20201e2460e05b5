//! WireGuard peer public keys.
//!
//! Keys travel as standard base64 of 32 raw bytes, the format printed by
//! `wg pubkey` and expected in `wg set ... peer <key>`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of a raw Curve25519 key.
pub const KEY_LEN: usize = 32;

/// A validated WireGuard public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerKey([u8; KEY_LEN]);

impl PeerKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Parses a base64-encoded key.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let decoded = BASE64
            .decode(s.trim())
            .map_err(|e| crate::Error::InvalidKey(format!("invalid base64: {e}")))?;
        let bytes: [u8; KEY_LEN] = decoded.try_into().map_err(|v: Vec<u8>| {
            crate::Error::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Returns the base64 form.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerKey({})", self.to_base64())
    }
}

impl FromStr for PeerKey {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PeerKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PeerKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
