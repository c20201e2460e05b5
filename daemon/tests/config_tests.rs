use clap::Parser;
use peerlease_daemon::config::parse_network;
use peerlease_daemon::{AdminRegistry, Args, BackendKind, parse_admin_tokens};
use peerlease_provision::{BackendConfig, ErrorKind};
use pretty_assertions::assert_eq;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

fn parse(args: &[&str]) -> Args {
    Args::try_parse_from(std::iter::once("peerlease").chain(args.iter().copied())).unwrap()
}

#[test]
fn local_backend_collects_endpoint_and_dns() {
    let args = parse(&[
        "--endpoint",
        "vpn.example.net:51820",
        "--dns",
        "1.1.1.1, 8.8.8.8",
        "--interface",
        "wg1",
    ]);
    assert_eq!(args.backend, BackendKind::Local);

    match args.backend_config().unwrap() {
        BackendConfig::Local(local) => {
            assert_eq!(local.interface, "wg1");
            assert_eq!(local.endpoint, "vpn.example.net:51820");
            assert_eq!(local.dns, vec!["1.1.1.1", "8.8.8.8"]);
        }
        other => panic!("expected local backend, got {other:?}"),
    }
}

#[test]
fn local_backend_without_endpoint_fails_at_startup() {
    let args = parse(&["--backend", "local"]);
    let err = args.backend_config().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FatalStartup);
}

#[test]
fn remote_backend_requires_host_and_key() {
    let no_host = parse(&["--backend", "remote", "--ssh-key-path", "/keys/id"]);
    assert_eq!(no_host.backend_config().unwrap_err().kind(), ErrorKind::FatalStartup);

    let no_key = parse(&["--backend", "remote", "--ssh-host", "wg.example.net"]);
    assert_eq!(no_key.backend_config().unwrap_err().kind(), ErrorKind::FatalStartup);
}

#[test]
fn remote_backend_carries_ssh_settings() {
    let args = parse(&[
        "--backend",
        "remote",
        "--ssh-host",
        "wg.example.net",
        "--ssh-port",
        "2222",
        "--ssh-user",
        "deploy",
        "--ssh-key-path",
        "/keys/id",
        "--ssh-known-hosts",
        "/keys/known_hosts",
    ]);
    match args.backend_config().unwrap() {
        BackendConfig::Remote(ssh) => {
            assert_eq!(ssh.host, "wg.example.net");
            assert_eq!(ssh.port, 2222);
            assert_eq!(ssh.user, "deploy");
            assert_eq!(ssh.key_path, PathBuf::from("/keys/id"));
            assert_eq!(ssh.known_hosts, Some(PathBuf::from("/keys/known_hosts")));
        }
        other => panic!("expected remote backend, got {other:?}"),
    }
}

#[test]
fn dev_backend_parses_network() {
    let args = parse(&[
        "--backend",
        "dev",
        "--endpoint",
        "localhost:51820",
        "--dev-network",
        "10.9.0.1/29",
    ]);
    match args.backend_config().unwrap() {
        BackendConfig::Dev(dev) => {
            assert_eq!(dev.network.address(), Ipv4Addr::new(10, 9, 0, 1));
            assert_eq!(dev.network.prefix_len(), 29);
        }
        other => panic!("expected dev backend, got {other:?}"),
    }
}

#[test]
fn malformed_networks_are_rejected() {
    for raw in ["10.9.0.1", "10.9.0.1/33", "not-an-ip/24", "10.9.0.1/x"] {
        let err = parse_network(raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FatalStartup, "{raw}");
    }
}

#[test]
fn scheduler_defaults_match_daily_runs() {
    let config = parse(&[]).scheduler_config().unwrap();
    assert_eq!(config.period, Duration::from_secs(24 * 60 * 60));
    assert_eq!(config.run_budget, Duration::from_secs(5 * 60));
    assert_eq!(config.cleanup_after, chrono::Duration::days(30));
}

#[test]
fn zero_scheduler_period_is_rejected() {
    let args = parse(&["--scheduler-period-secs", "0"]);
    assert_eq!(args.scheduler_config().unwrap_err().kind(), ErrorKind::FatalStartup);
}

#[test]
fn admin_tokens_accept_named_and_bare_entries() {
    let entries = vec![
        "ops:secret-1".to_string(),
        " ".to_string(),
        "secret-2".to_string(),
    ];
    assert_eq!(
        parse_admin_tokens(&entries),
        vec![
            ("ops".to_string(), "secret-1".to_string()),
            ("admin2".to_string(), "secret-2".to_string()),
        ]
    );
}

#[tokio::test]
async fn registry_authorizes_registered_tokens() {
    let registry = AdminRegistry::from_tokens(parse_admin_tokens(&["ops:secret".to_string()]));
    assert_eq!(registry.authorize("secret").await.as_deref(), Some("ops"));
    assert_eq!(registry.authorize("other").await, None);

    assert!(!registry.register("empty", "").await);
    assert!(registry.register("backup", "secret-2").await);
    assert_eq!(registry.len().await, 2);

    assert!(registry.revoke("secret").await);
    assert!(!registry.revoke("secret").await);
    assert_eq!(registry.authorize("secret").await, None);
}
