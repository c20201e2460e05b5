//! Admin token registry.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// Bearer tokens allowed to call admin routes, mapped to an operator name.
#[derive(Debug, Default)]
pub struct AdminRegistry {
    tokens: RwLock<HashMap<String, String>>,
}

impl AdminRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from `(name, token)` pairs. Empty tokens are skipped.
    pub fn from_tokens(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let tokens = pairs
            .into_iter()
            .filter(|(_, token)| !token.is_empty())
            .map(|(name, token)| (token, name))
            .collect();
        Self {
            tokens: RwLock::new(tokens),
        }
    }

    /// Adds a token. Returns false for an empty token.
    pub async fn register(&self, name: impl Into<String>, token: impl Into<String>) -> bool {
        let token = token.into();
        if token.is_empty() {
            return false;
        }
        let name = name.into();
        info!("Registered admin {}", name);
        self.tokens.write().await.insert(token, name);
        true
    }

    /// Removes a token. Returns whether it was registered.
    pub async fn revoke(&self, token: &str) -> bool {
        self.tokens.write().await.remove(token).is_some()
    }

    /// Returns the operator name for a token.
    pub async fn authorize(&self, token: &str) -> Option<String> {
        self.tokens.read().await.get(token).cloned()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

/// Parses `name:token` entries; a bare token gets a generated name.
pub fn parse_admin_tokens(entries: &[String]) -> Vec<(String, String)> {
    entries
        .iter()
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(i, entry)| match entry.split_once(':') {
            Some((name, token)) => (name.trim().to_string(), token.trim().to_string()),
            None => (format!("admin{}", i + 1), entry.to_string()),
        })
        .collect()
}
