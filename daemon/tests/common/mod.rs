//! Shared fixtures for API tests.

#![allow(dead_code)]

use peerlease_daemon::{AdminRegistry, AppState, build_router};
use peerlease_db::PeerDirectory;
use peerlease_provision::channel::mock::ScriptedChannel;
use peerlease_provision::interface::mock::MemoryInterface;
use peerlease_provision::{InterfaceNetwork, LocalProvisioner, Provisioner, RemoteProvisioner};
use peerlease_types::PeerKey;
use std::net::Ipv4Addr;
use std::sync::Arc;

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const ENDPOINT: &str = "vpn.example.net:51820";

pub struct TestServer {
    pub base: String,
    pub directory: PeerDirectory,
    pub interface: Arc<MemoryInterface>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

fn admins() -> Arc<AdminRegistry> {
    Arc::new(AdminRegistry::from_tokens([(
        "tester".to_string(),
        ADMIN_TOKEN.to_string(),
    )]))
}

async fn serve(state: AppState) -> String {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}", port)
}

/// Spin up the API over an in-memory directory and interface.
pub async fn spawn_test_server() -> TestServer {
    let directory = PeerDirectory::open_in_memory().unwrap();
    let network = InterfaceNetwork::new(Ipv4Addr::new(10, 8, 0, 1), 24).unwrap();
    let interface = Arc::new(MemoryInterface::new("wg-test", Some(network)));
    let provisioner = LocalProvisioner::new(
        Arc::clone(&interface),
        directory.clone(),
        ENDPOINT,
        vec!["1.1.1.1".to_string()],
    )
    .await
    .unwrap();
    let provisioner: Arc<dyn Provisioner> = Arc::new(provisioner);
    let base = serve(AppState::new(directory.clone(), provisioner, admins())).await;
    TestServer {
        base,
        directory,
        interface,
    }
}

/// Spin up the API over a remote backend whose every command fails.
pub async fn spawn_failing_server() -> (String, PeerDirectory) {
    let directory = PeerDirectory::open_in_memory().unwrap();
    let provisioner: Arc<dyn Provisioner> = Arc::new(RemoteProvisioner::new(
        ScriptedChannel::new(),
        directory.clone(),
    ));
    let base = serve(AppState::new(directory.clone(), provisioner, admins())).await;
    (base, directory)
}

pub fn key(byte: u8) -> PeerKey {
    PeerKey::from_bytes([byte; 32])
}

/// Percent-encodes a base64 key for use as a path segment.
pub fn path_key(key: &str) -> String {
    key.replace('+', "%2B").replace('/', "%2F").replace('=', "%3D")
}
