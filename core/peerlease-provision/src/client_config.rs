//! WireGuard client configuration rendering.

use std::net::Ipv4Addr;

/// Inputs for one client configuration file.
#[derive(Debug, Clone)]
pub struct ClientConfig<'a> {
    /// Omitted from the output when the client supplied its own key.
    pub private_key: Option<&'a str>,
    pub address: Ipv4Addr,
    pub dns: &'a [String],
    pub server_public_key: &'a str,
    pub endpoint: &'a str,
}

impl ClientConfig<'_> {
    /// Renders the configuration in wg-quick format.
    pub fn render(&self) -> Vec<u8> {
        let mut out = String::from("[Interface]\n");
        if let Some(private_key) = self.private_key {
            out.push_str(&format!("PrivateKey = {private_key}\n"));
        }
        out.push_str(&format!("Address = {}/32\n", self.address));
        if !self.dns.is_empty() {
            out.push_str(&format!("DNS = {}\n", self.dns.join(", ")));
        }
        out.push_str("\n[Peer]\n");
        out.push_str(&format!("PublicKey = {}\n", self.server_public_key));
        out.push_str("AllowedIPs = 0.0.0.0/0\n");
        out.push_str(&format!("Endpoint = {}\n", self.endpoint));
        out.into_bytes()
    }
}

/// Splits a comma-separated DNS list, dropping blank entries.
pub fn split_dns(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
