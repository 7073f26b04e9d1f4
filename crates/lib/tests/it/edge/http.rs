//! Edge HTTP surface: snapshot push and health.

use std::time::Duration;

use edgedir::{
    constants::{SNAPSHOT_VERSION_HEADER, SYNC_USERS_PATH},
    edge::{
        ArtifactCommand, ArtifactGenerator, EdgeService, EdgeServiceConfig, ReconcilerConfig,
        ReconcilerState, http::edge_router,
    },
    server::HttpServer,
    sync::SyncResponse,
};
use serde_json::Value;

use crate::helpers::*;

#[tokio::test]
async fn test_push_over_http() {
    let reconciler = test_reconciler().await;
    let mut server = HttpServer::new();
    let addr = server
        .start("127.0.0.1:0", edge_router(reconciler.clone()))
        .await
        .unwrap();
    let url = format!("http://{addr}{SYNC_USERS_PATH}");
    let client = reqwest::Client::new();

    let response: SyncResponse = client
        .post(&url)
        .header(SNAPSHOT_VERSION_HEADER, "1000")
        .json(&vec![record(1, "alice"), record(2, "bob")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.users_created, 2);
    assert_eq!(response.message, "Successfully synchronized 2 users");
    assert_eq!(reconciler.last_applied_version().await, Some(1000));

    // an older push is acknowledged but not applied
    let stale: SyncResponse = client
        .post(&url)
        .header(SNAPSHOT_VERSION_HEADER, "999")
        .json(&Vec::<edgedir::user::UserRecord>::new())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(stale.success);
    assert_eq!(stale.message, "stale snapshot ignored");
    assert_eq!(mirror_ids(&reconciler).await, vec![1, 2]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let reconciler = test_reconciler().await;
    let mut server = HttpServer::new();
    let addr = server
        .start("127.0.0.1:0", edge_router(reconciler.clone()))
        .await
        .unwrap();

    let response = reqwest::Client::new()
        .post(format!("http://{addr}{SYNC_USERS_PATH}"))
        .header("content-type", "application/json")
        .body(r#"{"not":"a list"}"#)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_client_error());
    assert_eq!(reconciler.mirror().count().await.unwrap(), 0);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_edge_service_health_without_authority() {
    let config = EdgeServiceConfig {
        bind_host: "127.0.0.1".to_string(),
        sync_port: 0,
        reconciler: ReconcilerConfig::without_artifacts(),
        ..Default::default()
    };
    let mut service = EdgeService::start(test_backend().await, config)
        .await
        .unwrap();
    assert!(service.registration().is_none());

    let addr = service.address().unwrap();
    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["role"], "edge");
    assert_eq!(body["state"], "idle");

    service.stop().await.unwrap();
    assert!(service.address().is_none());
}

#[tokio::test]
async fn test_edge_keeps_serving_when_registration_fails() {
    let config = EdgeServiceConfig {
        authority_url: Some("http://127.0.0.1:9".to_string()),
        bind_host: "127.0.0.1".to_string(),
        sync_port: 0,
        register_attempts: 1,
        reconciler: ReconcilerConfig::without_artifacts(),
        ..Default::default()
    };
    let mut service = EdgeService::start(test_backend().await, config)
        .await
        .unwrap();

    assert!(service.registration().is_none());
    assert!(service.address().is_some());

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_server_lifecycle_errors() {
    let reconciler = test_reconciler().await;
    let mut server = HttpServer::new();
    server
        .start("127.0.0.1:0", edge_router(reconciler.clone()))
        .await
        .unwrap();

    let err = server
        .start("127.0.0.1:0", edge_router(reconciler))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already running"));

    server.stop().await.unwrap();
    assert!(server.stop().await.is_err());
}

#[tokio::test]
async fn test_disconnected_push_still_regenerates_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("shadow");
    let reconciler = test_reconciler_with(ArtifactGenerator::new(
        vec![
            ArtifactCommand::new("passwd", "sh").arg("-c").arg("sleep 1"),
            ArtifactCommand::new("shadow", "sh")
                .arg("-c")
                .arg("touch \"$EDGEDIR_ARTIFACT_OUTPUT\"")
                .output(&marker),
        ],
        Duration::from_secs(10),
    ))
    .await;
    let mut server = HttpServer::new();
    let addr = server
        .start("127.0.0.1:0", edge_router(reconciler.clone()))
        .await
        .unwrap();

    // the client gives up while the first step is still running
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let err = client
        .post(format!("http://{addr}{SYNC_USERS_PATH}"))
        .json(&vec![record(1, "alice"), record(2, "bob")])
        .send()
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !(marker.exists() && reconciler.state() == ReconcilerState::Idle) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "regeneration never finished, state {}",
            reconciler.state()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(mirror_ids(&reconciler).await, vec![1, 2]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_incompatible_mirror_returns_server_error() {
    let reconciler = test_reconciler().await;
    break_mirror_schema(&reconciler).await;
    let mut server = HttpServer::new();
    let addr = server
        .start("127.0.0.1:0", edge_router(reconciler.clone()))
        .await
        .unwrap();

    let response = reqwest::Client::new()
        .post(format!("http://{addr}{SYNC_USERS_PATH}"))
        .json(&vec![record(1, "alice")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.starts_with("Error synchronizing users:"), "{detail}");

    assert_eq!(reconciler.state(), ReconcilerState::Failed);
    assert_eq!(
        broken_mirror_notes(&reconciler).await,
        vec![(7, "keep me".to_string())]
    );

    server.stop().await.unwrap();
}
