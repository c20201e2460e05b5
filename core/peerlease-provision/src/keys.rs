//! X25519 key pairs in WireGuard's base64 format.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use peerlease_types::PeerKey;
use rand::rngs::OsRng;
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};

/// A freshly generated peer key pair.
pub struct KeyPair {
    private_key: String,
    public_key: PeerKey,
}

impl KeyPair {
    /// Generates a key pair from the operating system RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            private_key: STANDARD.encode(secret.to_bytes()),
            public_key: PeerKey::from_bytes(public.to_bytes()),
        }
    }

    /// Base64 private key, as written into a client configuration.
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn public_key(&self) -> PeerKey {
        self.public_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}
