//! An authority and an edge talking real HTTP on localhost.

use std::sync::Arc;

use edgedir::{
    SystemClock,
    authority::{AuthorityService, AuthorityServiceConfig},
    edge::{AuthorityClient, EdgeService, EdgeServiceConfig, ReconcilerConfig},
    registry::EdgeRegistration,
    sync::{DispatcherConfig, SyncReason},
    user::crypto::verify_password,
};
use zeroize::Zeroizing;

use crate::helpers::*;

async fn start_authority() -> AuthorityService {
    let config = AuthorityServiceConfig {
        bind: "127.0.0.1:0".to_string(),
        dispatcher: DispatcherConfig {
            resync_interval: None,
            ..Default::default()
        },
    };
    AuthorityService::start(test_backend().await, Arc::new(SystemClock), config)
        .await
        .expect("Failed to start authority")
}

async fn start_edge(authority_url: &str) -> EdgeService {
    let config = EdgeServiceConfig {
        authority_url: Some(authority_url.to_string()),
        name: "lab-e2e".to_string(),
        address: "127.0.0.1".to_string(),
        bind_host: "127.0.0.1".to_string(),
        sync_port: 0,
        register_attempts: 1,
        reconciler: ReconcilerConfig::without_artifacts(),
        ..Default::default()
    };
    EdgeService::start(test_backend().await, config)
        .await
        .expect("Failed to start edge")
}

#[tokio::test]
async fn test_edge_converges_with_authority() {
    let mut authority = start_authority().await;
    let base = format!("http://{}", authority.address().unwrap());

    let alice = authority
        .authority()
        .create_user(new_user("alice"))
        .await
        .unwrap();

    // registering brings the edge online and schedules its first snapshot
    let mut edge = start_edge(&base).await;
    let registered = edge.registration().expect("edge should be registered");
    assert_eq!(registered.sync_port, edge.address().unwrap().port());
    authority.sync().flush().await.unwrap();

    let mirror = edge.reconciler().mirror();
    assert_eq!(
        mirror.all().await.unwrap(),
        authority.authority().store().list_all().await.unwrap()
    );
    let last = authority
        .registry()
        .get(registered.id)
        .await
        .unwrap()
        .last_sync
        .unwrap();
    assert!(last.success, "{}", last.message);

    // a password changed on the edge goes up, then comes back down
    let client = AuthorityClient::new(base.clone()).with_edge_host("lab-e2e");
    client
        .relay_password_change("alice", Zeroizing::new("changed-at-the-edge".to_string()))
        .await
        .unwrap();
    authority.sync().flush().await.unwrap();

    let mirrored = mirror.get(alice.id).await.unwrap().unwrap();
    assert!(verify_password("changed-at-the-edge", &mirrored.password_hash).is_ok());
    assert!(!mirrored.must_change_password);

    // deletes and creates land together on the next cycle
    authority.authority().delete_user(alice.id).await.unwrap();
    let bob = authority
        .authority()
        .create_user(new_user("bob"))
        .await
        .unwrap();
    authority.sync().flush().await.unwrap();

    let ids: Vec<_> = mirror.ids().await.unwrap().into_iter().collect();
    assert_eq!(ids, vec![bob.id]);

    edge.stop().await.unwrap();
    authority.stop().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_edge_is_reported_not_fatal() {
    let mut authority = start_authority().await;

    // registered, but nothing listens there
    let edge = authority
        .registry()
        .register(&EdgeRegistration::new("ghost", "127.0.0.1").with_sync_port(9))
        .await
        .unwrap();

    let report = authority
        .sync()
        .run_cycle(SyncReason::Manual)
        .await
        .unwrap();
    assert_eq!(report.edges_failed, 1);
    assert!(!report.results[0].success);

    let stored = authority.registry().get(edge.id).await.unwrap();
    assert!(stored.liveness.is_online());
    assert!(!stored.last_sync.unwrap().success);

    authority.stop().await.unwrap();
}
