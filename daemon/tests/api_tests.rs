mod common;

use chrono::{Duration, Utc};
use common::{ADMIN_TOKEN, key, path_key, spawn_failing_server, spawn_test_server};
use peerlease_daemon::api::{AccessResponse, ApprovalResponse, CreateDeviceResponse, RevokeResponse};
use peerlease_db::{Device, NewSubscription, User};
use peerlease_types::{SubscriptionStatus, UserId};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::net::Ipv4Addr;

async fn create_user(base: &str, external_id: i64, handle: &str) -> User {
    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/users", base))
        .json(&json!({ "external_id": external_id, "handle": handle }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

async fn approve(base: &str, user: UserId, days: u32, limit: u32) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/api/v1/approvals", base))
        .bearer_auth(ADMIN_TOKEN)
        .json(&json!({ "user_id": user, "duration_days": days, "device_limit": limit }))
        .send()
        .await
        .unwrap()
}

async fn create_device(base: &str, user: UserId, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/api/v1/users/{}/devices", base, user))
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn error_text(resp: reqwest::Response) -> String {
    let body: Value = resp.json().await.unwrap();
    body["error"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn create_user_refreshes_handle() {
    let server = spawn_test_server().await;
    let first = create_user(&server.base, 42, "alice").await;
    let second = create_user(&server.base, 42, "alice_new").await;

    assert_eq!(first.id, second.id);
    assert_eq!(second.handle, "alice_new");
}

#[tokio::test]
async fn blank_handle_is_rejected() {
    let server = spawn_test_server().await;
    let resp = reqwest::Client::new()
        .post(server.url("/api/v1/users"))
        .json(&json!({ "external_id": 1, "handle": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn access_without_subscription_is_denied() {
    let server = spawn_test_server().await;
    let user = create_user(&server.base, 7, "bob").await;

    let resp = reqwest::get(server.url(&format!("/api/v1/users/{}/access", user.id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: AccessResponse = resp.json().await.unwrap();
    assert!(!body.allowed);
    assert_eq!(body.reason.as_deref(), Some("no subscription"));
}

#[tokio::test]
async fn access_for_unknown_user_is_404() {
    let server = spawn_test_server().await;
    let resp = reqwest::get(server.url("/api/v1/users/999/access"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn paused_access_reports_grace_remaining() {
    let server = spawn_test_server().await;
    let user = create_user(&server.base, 8, "carol").await;
    let now = Utc::now();
    server
        .directory
        .insert_subscription(&NewSubscription {
            user_id: user.id,
            device_limit: 2,
            status: SubscriptionStatus::Paused,
            starts_at: now - Duration::days(30),
            ends_at: now - Duration::hours(1),
            grace_period_ends_at: Some(now + Duration::days(2)),
        })
        .unwrap();

    let body: AccessResponse = reqwest::get(server.url(&format!("/api/v1/users/{}/access", user.id)))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!body.allowed);
    assert_eq!(body.reason.as_deref(), Some("paused"));
    let remaining = body.grace_remaining_secs.unwrap();
    assert!(remaining > 0 && remaining <= 2 * 24 * 60 * 60);
}

#[tokio::test]
async fn approval_requires_admin_token() {
    let server = spawn_test_server().await;
    let user = create_user(&server.base, 9, "dave").await;
    let body = json!({ "user_id": user.id, "duration_days": 30, "device_limit": 3 });

    let missing = reqwest::Client::new()
        .post(server.url("/api/v1/approvals"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 401);

    let wrong = reqwest::Client::new()
        .post(server.url("/api/v1/approvals"))
        .bearer_auth("not-a-token")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);
}

#[tokio::test]
async fn approval_creates_then_extends() {
    let server = spawn_test_server().await;
    let user = create_user(&server.base, 10, "erin").await;

    let first: ApprovalResponse = approve(&server.base, user.id, 30, 3).await.json().await.unwrap();
    assert_eq!(first.outcome, "created");
    assert_eq!(first.subscription.status, SubscriptionStatus::Active);

    let second: ApprovalResponse = approve(&server.base, user.id, 10, 3).await.json().await.unwrap();
    assert_eq!(second.outcome, "extended");
    assert_eq!(second.subscription.id, first.subscription.id);
    assert_eq!(
        second.subscription.ends_at,
        first.subscription.ends_at + Duration::days(10)
    );
}

#[tokio::test]
async fn invalid_approvals_are_rejected() {
    let server = spawn_test_server().await;
    let user = create_user(&server.base, 11, "frank").await;

    assert_eq!(approve(&server.base, user.id, 0, 3).await.status(), 400);
    assert_eq!(approve(&server.base, UserId::new(999), 30, 3).await.status(), 404);
}

#[tokio::test]
async fn device_without_subscription_is_forbidden() {
    let server = spawn_test_server().await;
    let user = create_user(&server.base, 12, "grace").await;

    let resp = create_device(&server.base, user.id, json!({})).await;
    assert_eq!(resp.status(), 403);
    assert_eq!(error_text(resp).await, "no subscription");
    assert_eq!(server.interface.peer_count(), 0);
}

#[tokio::test]
async fn generated_device_gets_config_and_default_name() {
    let server = spawn_test_server().await;
    let user = create_user(&server.base, 13, "heidi").await;
    approve(&server.base, user.id, 30, 3).await;

    let resp = create_device(&server.base, user.id, json!({})).await;
    assert_eq!(resp.status(), 200);
    let created: CreateDeviceResponse = resp.json().await.unwrap();
    assert_eq!(created.assigned_address, Ipv4Addr::new(10, 8, 0, 2));
    assert!(created.config.contains("PrivateKey = "));
    assert!(created.config.contains("Address = 10.8.0.2/32"));
    assert!(created.config.contains("Endpoint = vpn.example.net:51820"));
    assert_eq!(server.interface.peer_count(), 1);

    let second: CreateDeviceResponse = create_device(&server.base, user.id, json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second.assigned_address, Ipv4Addr::new(10, 8, 0, 3));

    let devices: Vec<Device> =
        reqwest::get(server.url(&format!("/api/v1/users/{}/devices", user.id)))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["device_1", "device_2"]);
}

#[tokio::test]
async fn supplied_key_config_has_no_private_key() {
    let server = spawn_test_server().await;
    let user = create_user(&server.base, 14, "ivan").await;
    approve(&server.base, user.id, 30, 3).await;
    let supplied = key(7).to_base64();

    let resp = create_device(
        &server.base,
        user.id,
        json!({ "device_name": "laptop", "public_key": supplied }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let created: CreateDeviceResponse = resp.json().await.unwrap();
    assert_eq!(created.public_key, supplied);
    assert!(!created.config.contains("PrivateKey"));

    let again = create_device(&server.base, user.id, json!({ "public_key": supplied })).await;
    assert_eq!(again.status(), 409);
}

#[tokio::test]
async fn malformed_supplied_key_is_bad_request() {
    let server = spawn_test_server().await;
    let user = create_user(&server.base, 15, "judy").await;
    approve(&server.base, user.id, 30, 3).await;

    let resp = create_device(&server.base, user.id, json!({ "public_key": "not base64!" })).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(server.interface.peer_count(), 0);
}

#[tokio::test]
async fn device_limit_is_enforced() {
    let server = spawn_test_server().await;
    let user = create_user(&server.base, 16, "mallory").await;
    approve(&server.base, user.id, 30, 1).await;

    assert_eq!(create_device(&server.base, user.id, json!({})).await.status(), 200);
    let resp = create_device(&server.base, user.id, json!({})).await;
    assert_eq!(resp.status(), 403);
    assert_eq!(error_text(resp).await, "device limit reached (1/1)");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_respect_device_limit() {
    const N: usize = 16;
    let server = spawn_test_server().await;
    let user = create_user(&server.base, 19, "peggy").await;
    approve(&server.base, user.id, 30, 2).await;

    let mut handles = Vec::new();
    for i in 0..N {
        let base = server.base.clone();
        handles.push(tokio::spawn(async move {
            create_device(&base, user.id, json!({ "device_name": format!("d{i}") }))
                .await
                .status()
        }));
    }
    let mut ok = 0;
    let mut forbidden = 0;
    for handle in handles {
        match handle.await.unwrap().as_u16() {
            200 => ok += 1,
            403 => forbidden += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!((ok, forbidden), (2, N - 2));
    assert_eq!(server.directory.devices_for_user(user.id).unwrap().len(), 2);
    assert_eq!(server.interface.peer_count(), 2);
}

#[tokio::test]
async fn backend_failure_is_hidden_from_users() {
    let (base, _directory) = spawn_failing_server().await;
    let user = create_user(&base, 17, "niaj").await;
    approve(&base, user.id, 30, 3).await;

    let resp = create_device(&base, user.id, json!({})).await;
    assert_eq!(resp.status(), 500);
    assert_eq!(error_text(resp).await, "provisioning failed");
}

#[tokio::test]
async fn revoke_removes_peer_and_ledger_row() {
    let server = spawn_test_server().await;
    let user = create_user(&server.base, 18, "olivia").await;
    approve(&server.base, user.id, 30, 3).await;
    let created: CreateDeviceResponse = create_device(&server.base, user.id, json!({}))
        .await
        .json()
        .await
        .unwrap();
    let url = server.url(&format!("/api/v1/devices/{}", path_key(&created.public_key)));

    let unauthorized = reqwest::Client::new().delete(&url).send().await.unwrap();
    assert_eq!(unauthorized.status(), 401);

    let resp = reqwest::Client::new()
        .delete(&url)
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: RevokeResponse = resp.json().await.unwrap();
    assert_eq!(body.device_id, created.device_id);
    assert!(body.revoked);
    assert_eq!(server.interface.peer_count(), 0);
    assert!(server.directory.devices_for_user(user.id).unwrap().is_empty());

    let again = reqwest::Client::new()
        .delete(&url)
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let server = spawn_test_server().await;
    let resp = reqwest::get(server.url("/api/v1/nonexistent")).await.unwrap();
    assert_eq!(resp.status(), 404);
}
