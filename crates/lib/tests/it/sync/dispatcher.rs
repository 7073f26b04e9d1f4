//! One sync cycle at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use edgedir::{
    registry::Liveness,
    sync::{DispatcherConfig, SyncSnapshot},
};

use crate::helpers::*;

#[tokio::test]
async fn test_cycle_without_edges() {
    let transport = Arc::new(ScriptedTransport::default());
    let fixture = sync_fixture(transport.clone()).await;
    fixture
        .authority
        .create_user(new_user("alice"))
        .await
        .unwrap();

    let report = fixture.dispatcher.run_cycle().await.unwrap();

    assert!(report.success());
    assert_eq!(report.users_count, 1);
    assert_eq!(report.edges_synced, 0);
    assert!(report.results.is_empty());
    assert_eq!(report.message, "No online edges to sync");
    assert!(transport.pushes().is_empty());
}

#[tokio::test]
async fn test_snapshot_is_complete_and_versioned() {
    let transport = Arc::new(ScriptedTransport::default());
    let fixture = sync_fixture(transport.clone()).await;
    for name in ["alice", "bob", "carol"] {
        fixture.authority.create_user(new_user(name)).await.unwrap();
    }
    online_edge(&fixture.registry, "10.0.0.1").await;

    let report = fixture.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.snapshot_version, 1_704_067_200_000);

    fixture.clock.advance(1_000);
    fixture.dispatcher.run_cycle().await.unwrap();

    assert_eq!(
        transport.pushes(),
        vec![
            ("10.0.0.1".to_string(), 1_704_067_200_000, 3),
            ("10.0.0.1".to_string(), 1_704_067_201_000, 3),
        ]
    );
}

#[tokio::test]
async fn test_snapshot_capture_orders_by_id() {
    let (authority, _) = test_authority().await;
    for name in ["zed", "amy", "mo"] {
        authority.create_user(new_user(name)).await.unwrap();
    }

    let snapshot = SyncSnapshot::capture(authority.store(), authority.clock().as_ref())
        .await
        .unwrap();
    let ids: Vec<_> = snapshot.users.iter().map(|u| u.id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
    assert_eq!(snapshot.ids().len(), 3);
    assert!(snapshot.taken_at.starts_with("2024-01-01"));
}

#[tokio::test]
async fn test_offline_edges_are_skipped() {
    let transport = Arc::new(ScriptedTransport::default());
    let fixture = sync_fixture(transport.clone()).await;
    let a = online_edge(&fixture.registry, "10.0.0.1").await;
    let b = online_edge(&fixture.registry, "10.0.0.2").await;
    fixture
        .registry
        .set_liveness(b.id, Liveness::Offline)
        .await
        .unwrap();

    let report = fixture.dispatcher.run_cycle().await.unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].edge_id, a.id);
    assert_eq!(transport.pushes_to("10.0.0.2"), 0);
    assert!(fixture.registry.get(b.id).await.unwrap().last_sync.is_none());
}

#[tokio::test]
async fn test_slow_edge_times_out_without_holding_others() {
    let transport = Arc::new(ScriptedTransport::default());
    let config = DispatcherConfig {
        push_timeout: Duration::from_millis(200),
        resync_interval: None,
    };
    let fixture = sync_fixture_with(transport.clone(), config).await;
    let slow = online_edge(&fixture.registry, "10.0.0.1").await;
    let fast = online_edge(&fixture.registry, "10.0.0.2").await;
    transport.set("10.0.0.1", EdgeBehavior::Hang);

    let started = Instant::now();
    let report = fixture.dispatcher.run_cycle().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(report.edges_synced, 1);
    assert_eq!(report.edges_failed, 1);
    let slow_result = report.results.iter().find(|r| r.edge_id == slow.id).unwrap();
    assert!(!slow_result.success);
    assert!(slow_result.message.contains("Timed out"));
    assert!(slow_result.response.is_none());

    let recorded = fixture.registry.get(slow.id).await.unwrap();
    let outcome = recorded.last_sync.unwrap();
    assert!(!outcome.success);
    assert!(recorded.liveness.is_online(), "a failed push never flips liveness");

    let fast_outcome = fixture.registry.get(fast.id).await.unwrap().last_sync.unwrap();
    assert!(fast_outcome.success);
}

#[tokio::test]
async fn test_failures_are_isolated_per_edge() {
    let transport = Arc::new(ScriptedTransport::default());
    let fixture = sync_fixture(transport.clone()).await;
    online_edge(&fixture.registry, "10.0.0.1").await;
    online_edge(&fixture.registry, "10.0.0.2").await;
    online_edge(&fixture.registry, "10.0.0.3").await;
    transport.set("10.0.0.1", EdgeBehavior::Unreachable);
    transport.set(
        "10.0.0.2",
        EdgeBehavior::ReportFailure("Error synchronizing users: disk full".to_string()),
    );

    let report = fixture.dispatcher.run_cycle().await.unwrap();

    assert_eq!(report.results.len(), 3);
    assert_eq!(report.edges_failed, 2);
    assert_eq!(report.edges_synced, 1);
    assert!(report.results[0].message.contains("Failed to connect"));
    assert_eq!(
        report.results[1].message,
        "Error synchronizing users: disk full"
    );
    assert!(report.results[2].success);
    assert_eq!(
        report.message,
        "Synchronized 0 users to 1 edges (2 failed)"
    );
}

#[tokio::test]
async fn test_edges_converge_on_the_directory() {
    let transport = Arc::new(LoopbackTransport::default());
    let fixture = sync_fixture(transport.clone()).await;
    let lab1 = test_reconciler().await;
    let lab2 = test_reconciler().await;
    transport.attach("10.0.0.1", lab1.clone());
    transport.attach("10.0.0.2", lab2.clone());
    online_edge(&fixture.registry, "10.0.0.1").await;
    online_edge(&fixture.registry, "10.0.0.2").await;

    let alice = fixture.authority.create_user(new_user("alice")).await.unwrap();
    let bob = fixture.authority.create_user(new_user("bob")).await.unwrap();
    let report = fixture.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.edges_synced, 2);

    let directory = fixture.authority.store().list_all().await.unwrap();
    assert_eq!(lab1.mirror().all().await.unwrap(), directory);
    assert_eq!(lab2.mirror().all().await.unwrap(), directory);

    fixture.authority.delete_user(alice.id).await.unwrap();
    fixture.authority.deactivate_user(bob.id).await.unwrap();
    fixture.clock.advance(10);
    fixture.dispatcher.run_cycle().await.unwrap();

    let directory = fixture.authority.store().list_all().await.unwrap();
    assert_eq!(directory.len(), 1);
    assert!(!directory[0].is_active);
    assert_eq!(lab1.mirror().all().await.unwrap(), directory);
    assert_eq!(lab2.mirror().all().await.unwrap(), directory);
}

#[tokio::test]
async fn test_edge_that_missed_cycles_catches_up() {
    let transport = Arc::new(LoopbackTransport::default());
    let fixture = sync_fixture(transport.clone()).await;
    let lab = test_reconciler().await;
    transport.attach("10.0.0.1", lab.clone());
    let edge = online_edge(&fixture.registry, "10.0.0.1").await;

    fixture.authority.create_user(new_user("alice")).await.unwrap();
    fixture.dispatcher.run_cycle().await.unwrap();

    fixture
        .registry
        .set_liveness(edge.id, Liveness::Offline)
        .await
        .unwrap();
    fixture.authority.create_user(new_user("bob")).await.unwrap();
    fixture.authority.create_user(new_user("carol")).await.unwrap();
    fixture.clock.advance(10);
    fixture.dispatcher.run_cycle().await.unwrap();
    assert_eq!(lab.mirror().count().await.unwrap(), 1);

    fixture
        .registry
        .set_liveness(edge.id, Liveness::Online)
        .await
        .unwrap();
    fixture.clock.advance(10);
    fixture.dispatcher.run_cycle().await.unwrap();
    assert_eq!(
        lab.mirror().all().await.unwrap(),
        fixture.authority.store().list_all().await.unwrap()
    );
}

#[tokio::test]
async fn test_clock_stepping_back_does_not_stall_edges() {
    let transport = Arc::new(LoopbackTransport::default());
    let fixture = sync_fixture(transport.clone()).await;
    let lab = test_reconciler().await;
    transport.attach("10.0.0.1", lab.clone());
    online_edge(&fixture.registry, "10.0.0.1").await;

    let alice = fixture.authority.create_user(new_user("alice")).await.unwrap();
    let first = fixture.dispatcher.run_cycle().await.unwrap();

    // the wall clock is corrected an hour backwards
    fixture.clock.set(first.snapshot_version - 3_600_000);
    fixture.authority.deactivate_user(alice.id).await.unwrap();
    let second = fixture.dispatcher.run_cycle().await.unwrap();

    assert!(second.snapshot_version > first.snapshot_version);
    assert_eq!(second.edges_synced, 1);
    assert_eq!(second.results[0].response.as_ref().unwrap().message, "Successfully synchronized 1 users");
    let mirrored = lab.mirror().get(alice.id).await.unwrap().unwrap();
    assert!(!mirrored.is_active);

    // and versions keep climbing while the clock stands still
    let third = SyncSnapshot::capture(fixture.authority.store(), fixture.clock.as_ref())
        .await
        .unwrap();
    assert_eq!(third.version, second.snapshot_version + 1);
}
