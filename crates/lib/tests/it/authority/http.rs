//! Authority HTTP surface, driven over real sockets.

use std::sync::Arc;

use edgedir::{
    authority::{AuthorityService, AuthorityServiceConfig},
    constants::EDGE_HOST_HEADER,
    edge::AuthorityClient,
    registry::{EdgeDescriptor, EdgeRegistration, Liveness},
    sync::{
        CycleReport, DispatcherConfig, SyncError,
        protocol::{ErrorBody, PasswordRelayResponse},
    },
    user::crypto::verify_password,
};
use serde_json::{Value, json};
use zeroize::Zeroizing;

use crate::helpers::*;

async fn start_authority() -> (AuthorityService, Arc<ScriptedTransport>, String) {
    let transport = Arc::new(ScriptedTransport::default());
    let config = AuthorityServiceConfig {
        bind: "127.0.0.1:0".to_string(),
        dispatcher: DispatcherConfig {
            resync_interval: None,
            ..Default::default()
        },
    };
    let service = AuthorityService::start_with_transport(
        test_backend().await,
        test_clock(),
        transport.clone(),
        config,
    )
    .await
    .expect("Failed to start authority");
    let base = format!("http://{}", service.address().unwrap());
    (service, transport, base)
}

#[tokio::test]
async fn test_health() {
    let (mut service, _, base) = start_authority().await;

    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "status": "healthy", "role": "authority" }));

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_register_lists_and_pushes() {
    let (mut service, transport, base) = start_authority().await;
    let client = reqwest::Client::new();

    let edge: EdgeDescriptor = client
        .post(format!("{base}/api/edges/register"))
        .json(&json!({ "name": "lab-1", "address": "10.0.0.5" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(edge.name, "lab-1");
    assert_eq!(edge.sync_port, 8100);
    assert_eq!(edge.liveness, Liveness::Online);

    let edges: Vec<EdgeDescriptor> = client
        .get(format!("{base}/api/edges"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].id, edge.id);
    assert_eq!(edges[0].address, "10.0.0.5");

    // registration schedules a cycle that reaches the new edge
    service.sync().flush().await.unwrap();
    assert_eq!(transport.pushes_to("10.0.0.5"), 1);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_liveness_endpoint() {
    let (mut service, transport, base) = start_authority().await;
    let client = reqwest::Client::new();
    let edge = online_edge(service.registry(), "10.0.0.6").await;

    let updated: EdgeDescriptor = client
        .put(format!("{base}/api/edges/{}/liveness", edge.id))
        .json(&json!({ "online": false }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated.liveness, Liveness::Offline);

    let report: CycleReport = client
        .post(format!("{base}/api/sync/users/manual"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(report.results.is_empty());
    assert_eq!(transport.pushes_to("10.0.0.6"), 0);

    let missing = client
        .put(format!("{base}/api/edges/9999/liveness"))
        .json(&json!({ "online": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let body: ErrorBody = missing.json().await.unwrap();
    assert!(body.detail.contains("9999"));

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_manual_sync_reports_each_edge() {
    let (mut service, transport, base) = start_authority().await;
    online_edge(service.registry(), "10.0.0.7").await;
    online_edge(service.registry(), "10.0.0.8").await;
    transport.set("10.0.0.8", EdgeBehavior::Unreachable);
    service
        .authority()
        .create_user(new_user("alice"))
        .await
        .unwrap();
    service.sync().flush().await.unwrap();

    let report: CycleReport = reqwest::Client::new()
        .post(format!("{base}/api/sync/users/manual"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(report.users_count, 1);
    assert_eq!(report.edges_synced, 1);
    assert_eq!(report.edges_failed, 1);
    assert!(!report.success());

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_password_relay_endpoint() {
    let (mut service, _, base) = start_authority().await;
    service
        .authority()
        .create_user(new_user("alice"))
        .await
        .unwrap();
    let client = reqwest::Client::new();

    let response: PasswordRelayResponse = client
        .post(format!("{base}/api/users/alice/change-password-from-edge"))
        .header(EDGE_HOST_HEADER, "lab-2")
        .json(&json!({ "new_password": "changed-on-edge" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.source_edge.as_deref(), Some("lab-2"));

    let stored = service
        .authority()
        .get_user_by_username("alice")
        .await
        .unwrap();
    assert!(verify_password("changed-on-edge", &stored.password_hash).is_ok());

    let unknown = client
        .post(format!("{base}/api/users/ghost/change-password-from-edge"))
        .json(&json!({ "new_password": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 404);

    let empty = client
        .post(format!("{base}/api/users/alice/change-password-from-edge"))
        .json(&json!({ "new_password": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 400);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_registration_is_bad_request() {
    let (mut service, _, base) = start_authority().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/api/edges/register"))
        .json(&json!({ "name": " ", "address": "10.0.0.9" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    service.stop().await.unwrap();
}

// ===== EDGE-SIDE CLIENT =====

#[tokio::test]
async fn test_authority_client_register_and_relay() {
    let (mut service, _, base) = start_authority().await;
    service
        .authority()
        .create_user(new_user("bob"))
        .await
        .unwrap();

    let client = AuthorityClient::new(format!("{base}/")).with_edge_host("lab-4");
    let edge = client
        .register(&EdgeRegistration::new("lab-4", "10.0.0.4").with_sync_port(9100))
        .await
        .unwrap();
    assert_eq!(edge.sync_port, 9100);
    assert_eq!(
        service.registry().get_by_address("10.0.0.4").await.unwrap().id,
        edge.id
    );

    let response = client
        .relay_password_change("bob", Zeroizing::new("from-lab-4".to_string()))
        .await
        .unwrap();
    assert_eq!(response.source_edge.as_deref(), Some("lab-4"));
    assert!(response.message.contains("lab-4"));

    let err = client
        .relay_password_change("ghost", Zeroizing::new("pw".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, edgedir::Error::Sync(SyncError::NotFound(_))));

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_relayed_username_cannot_reach_other_routes() {
    let (mut service, _, base) = start_authority().await;
    let client = AuthorityClient::new(base);

    for username in ["a/b", "x/../../edges/register#", "bob?admin=1"] {
        let err = client
            .relay_password_change(username, Zeroizing::new("pw".to_string()))
            .await
            .unwrap_err();
        assert!(
            matches!(err, edgedir::Error::Sync(SyncError::NotFound(_))),
            "{username}: {err:?}"
        );
    }
    assert!(service.registry().list().await.unwrap().is_empty());

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_register_with_retry_gives_up() {
    let client = AuthorityClient::new("http://127.0.0.1:9");
    let err = client
        .register_with_retry(
            &EdgeRegistration::new("lab-5", "10.0.0.5"),
            2,
            std::time::Duration::from_millis(10),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, edgedir::Error::Sync(SyncError::Connectivity { .. })));
}
