//! Edge registry integration tests

use edgedir::registry::{EdgeRegistration, EdgeRegistry, Liveness, SyncOutcome};

use crate::helpers::*;

async fn test_registry() -> EdgeRegistry {
    EdgeRegistry::open(test_backend().await, test_clock())
        .await
        .expect("Failed to open registry")
}

#[tokio::test]
async fn test_register_new_edge() {
    let registry = test_registry().await;

    let edge = registry
        .register(&EdgeRegistration::new("lab-1", "10.0.0.1"))
        .await
        .unwrap();

    assert_eq!(edge.name, "lab-1");
    assert_eq!(edge.endpoint(), "10.0.0.1:8100");
    assert_eq!(edge.ssh_port, 22);
    assert_eq!(edge.ssh_user, "root");
    assert!(edge.liveness.is_online());
    assert!(edge.last_sync.is_none());
    assert!(edge.registered_at.starts_with("2024-01-01"));
}

#[tokio::test]
async fn test_reregistration_upserts_by_address() {
    let registry = test_registry().await;

    let first = registry
        .register(&EdgeRegistration::new("lab-1", "10.0.0.1"))
        .await
        .unwrap();
    registry.set_liveness(first.id, Liveness::Offline).await.unwrap();

    let again = registry
        .register(&EdgeRegistration::new("lab-1-renamed", "10.0.0.1").with_sync_port(9000))
        .await
        .unwrap();

    assert_eq!(again.id, first.id);
    assert_eq!(again.name, "lab-1-renamed");
    assert_eq!(again.sync_port, 9000);
    assert_eq!(again.liveness, Liveness::Online, "registering brings it back online");
    assert_eq!(registry.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rejects_empty_registration() {
    let registry = test_registry().await;

    let err = registry
        .register(&EdgeRegistration::new("", "10.0.0.1"))
        .await
        .unwrap_err();
    assert!(err.is_validation_error());

    let err = registry
        .register(&EdgeRegistration::new("lab", "  "))
        .await
        .unwrap_err();
    assert!(err.is_validation_error());
    assert!(registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_online_listing_follows_liveness() {
    let registry = test_registry().await;
    let a = online_edge(&registry, "10.0.0.1").await;
    let b = online_edge(&registry, "10.0.0.2").await;
    let c = online_edge(&registry, "10.0.0.3").await;

    registry.set_liveness(b.id, Liveness::Offline).await.unwrap();
    registry
        .set_liveness_by_address("10.0.0.3", Liveness::Offline)
        .await
        .unwrap();

    let online: Vec<_> = registry
        .list_online()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(online, vec![a.id]);

    registry.set_liveness(c.id, Liveness::Online).await.unwrap();
    let online: Vec<_> = registry
        .list_online()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(online, vec![a.id, c.id]);
}

#[tokio::test]
async fn test_unknown_edges_are_not_found() {
    let registry = test_registry().await;

    assert!(registry.get(7).await.unwrap_err().is_not_found());
    assert!(
        registry
            .get_by_address("10.9.9.9")
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert!(
        registry
            .set_liveness(7, Liveness::Online)
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert!(registry.remove(7).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_sync_outcome_does_not_change_liveness() {
    let registry = test_registry().await;
    let edge = online_edge(&registry, "10.0.0.1").await;

    let outcome = SyncOutcome {
        at: "2024-01-01T00:00:05+00:00".to_string(),
        success: false,
        message: "Timed out".to_string(),
    };
    registry.record_sync_outcome(edge.id, &outcome).await.unwrap();

    let stored = registry.get(edge.id).await.unwrap();
    assert_eq!(stored.last_sync, Some(outcome));
    assert!(stored.liveness.is_online());
}

#[tokio::test]
async fn test_remove() {
    let registry = test_registry().await;
    let edge = online_edge(&registry, "10.0.0.1").await;

    registry.remove(edge.id).await.unwrap();
    assert!(registry.list().await.unwrap().is_empty());

    // the address is free again
    let again = online_edge(&registry, "10.0.0.1").await;
    assert_ne!(again.id, edge.id);
}
