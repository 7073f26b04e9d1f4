//! Snapshot reconciliation: set arithmetic, idempotence, partial failure, staleness.

use edgedir::{Error, edge::ReconcilerState, sync::SyncError};

use crate::helpers::*;

#[tokio::test]
async fn test_first_snapshot_creates_everything() {
    let reconciler = test_reconciler().await;

    let result = reconciler
        .reconcile(vec![record(1, "alice"), record(2, "bob")], Some(1))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.users_synced, 2);
    assert_eq!((result.created, result.updated, result.deleted), (2, 0, 0));
    assert!(result.warnings.is_empty());
    assert_eq!(mirror_ids(&reconciler).await, vec![1, 2]);
    assert_eq!(reconciler.state(), ReconcilerState::Idle);
    assert_eq!(reconciler.last_applied_version().await, Some(1));
}

#[tokio::test]
async fn test_create_update_delete_arithmetic() {
    let reconciler = test_reconciler().await;
    reconciler
        .reconcile(
            vec![record(1, "alice"), record(2, "bob"), record(3, "carol")],
            None,
        )
        .await
        .unwrap();

    let result = reconciler
        .reconcile(
            vec![record(2, "bob"), record(3, "carol"), record(4, "dave")],
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.created, 1);
    assert_eq!(result.updated, 2);
    assert_eq!(result.deleted, 1);
    assert_eq!(
        result.to_response().message,
        "Successfully synchronized 3 users"
    );
    assert_eq!(mirror_ids(&reconciler).await, vec![2, 3, 4]);
}

#[tokio::test]
async fn test_mirror_matches_snapshot_exactly() {
    let reconciler = test_reconciler().await;
    reconciler
        .reconcile(vec![record(1, "alice"), record(2, "bob")], None)
        .await
        .unwrap();

    let mut bob = record(2, "bob");
    bob.email = "robert@example.com".to_string();
    bob.password_hash = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$rotated".to_string();
    bob.is_active = false;
    bob.is_admin = true;
    bob.must_change_password = true;
    bob.ssh_public_key = Some("ssh-ed25519 AAAA bob".to_string());
    let snapshot = vec![record(1, "alice"), bob.clone()];

    reconciler.reconcile(snapshot.clone(), None).await.unwrap();

    assert_eq!(reconciler.mirror().all().await.unwrap(), snapshot);
    assert_eq!(reconciler.mirror().get(2).await.unwrap(), Some(bob));
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let reconciler = test_reconciler().await;
    let snapshot = vec![record(1, "alice"), record(5, "erin"), record(9, "ivan")];

    reconciler.reconcile(snapshot.clone(), None).await.unwrap();
    let before = reconciler.mirror().all().await.unwrap();

    let again = reconciler.reconcile(snapshot.clone(), None).await.unwrap();
    assert_eq!((again.created, again.updated, again.deleted), (0, 3, 0));
    assert_eq!(reconciler.mirror().all().await.unwrap(), before);
}

#[tokio::test]
async fn test_empty_snapshot_clears_mirror() {
    let reconciler = test_reconciler().await;
    reconciler
        .reconcile(vec![record(1, "alice"), record(2, "bob")], None)
        .await
        .unwrap();

    let result = reconciler.reconcile(Vec::new(), None).await.unwrap();

    assert!(result.success);
    assert_eq!(result.users_synced, 0);
    assert_eq!(result.deleted, 2);
    assert_eq!(reconciler.mirror().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_recreated_account_reuses_username() {
    let reconciler = test_reconciler().await;
    reconciler
        .reconcile(vec![record(1, "alice")], None)
        .await
        .unwrap();

    // alice was deleted and recreated on the authority under a new id and uid
    let result = reconciler
        .reconcile(vec![record(7, "alice")], None)
        .await
        .unwrap();

    assert!(result.skipped.is_empty(), "{:?}", result.warnings);
    assert_eq!((result.created, result.deleted), (1, 1));
    let alice = reconciler
        .mirror()
        .get_by_username("alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alice.id, 7);
}

#[tokio::test]
async fn test_bad_row_is_skipped_and_others_commit() {
    let reconciler = test_reconciler().await;

    let mut clash = record(2, "bob");
    clash.email = "alice@example.com".to_string();
    let snapshot = vec![record(1, "alice"), clash, record(3, "carol")];

    let result = reconciler.reconcile(snapshot, None).await.unwrap();

    assert!(result.success);
    assert_eq!(result.created, 2);
    assert_eq!(result.skipped, vec![2]);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].starts_with("User 2 skipped:"));
    assert!(result.to_response().message.contains("(Warnings: User 2 skipped:"));
    assert_eq!(mirror_ids(&reconciler).await, vec![1, 3]);
}

#[tokio::test]
async fn test_invalid_username_is_skipped() {
    let reconciler = test_reconciler().await;

    let result = reconciler
        .reconcile(vec![record(1, "alice"), record(2, "Not Valid")], None)
        .await
        .unwrap();

    assert_eq!(result.skipped, vec![2]);
    assert_eq!(result.warnings, vec!["User 2 skipped: invalid username"]);
    assert_eq!(mirror_ids(&reconciler).await, vec![1]);
}

#[tokio::test]
async fn test_failed_update_keeps_previous_row() {
    let reconciler = test_reconciler().await;
    reconciler
        .reconcile(vec![record(1, "alice"), record(2, "bob")], None)
        .await
        .unwrap();

    let mut bob = record(2, "bob");
    bob.system_uid = record(1, "alice").system_uid;
    let result = reconciler
        .reconcile(vec![record(1, "alice"), bob], None)
        .await
        .unwrap();

    assert_eq!(result.skipped, vec![2]);
    assert_eq!(result.updated, 1);
    let stored = reconciler.mirror().get(2).await.unwrap().unwrap();
    assert_eq!(stored, record(2, "bob"));
}

#[tokio::test]
async fn test_duplicate_ids_last_one_wins() {
    let reconciler = test_reconciler().await;

    let mut second = record(1, "alice");
    second.email = "alice@new.example.com".to_string();
    let result = reconciler
        .reconcile(vec![record(1, "alice"), second], None)
        .await
        .unwrap();

    assert_eq!(result.created, 1);
    let stored = reconciler.mirror().get(1).await.unwrap().unwrap();
    assert_eq!(stored.email, "alice@new.example.com");
}

// ===== STALENESS =====

#[tokio::test]
async fn test_older_snapshot_is_ignored() {
    let reconciler = test_reconciler().await;
    reconciler
        .reconcile(vec![record(1, "alice"), record(2, "bob")], Some(200))
        .await
        .unwrap();

    let stale = reconciler.reconcile(Vec::new(), Some(100)).await.unwrap();
    assert!(stale.success);
    assert!(stale.stale);
    assert_eq!(stale.to_response().message, "stale snapshot ignored");
    assert_eq!(mirror_ids(&reconciler).await, vec![1, 2]);
    assert_eq!(reconciler.last_applied_version().await, Some(200));

    // same version again is not stale
    let same = reconciler
        .reconcile(vec![record(1, "alice")], Some(200))
        .await
        .unwrap();
    assert!(!same.stale);
    assert_eq!(mirror_ids(&reconciler).await, vec![1]);

    let newer = reconciler.reconcile(Vec::new(), Some(300)).await.unwrap();
    assert_eq!(newer.deleted, 1);
    assert_eq!(reconciler.last_applied_version().await, Some(300));
}

#[tokio::test]
async fn test_unversioned_snapshot_always_applies() {
    let reconciler = test_reconciler().await;
    reconciler
        .reconcile(vec![record(1, "alice")], Some(500))
        .await
        .unwrap();

    let result = reconciler.reconcile(Vec::new(), None).await.unwrap();
    assert!(!result.stale);
    assert_eq!(result.deleted, 1);
    assert_eq!(reconciler.last_applied_version().await, Some(500));
}

#[tokio::test]
async fn test_concurrent_pushes_converge() {
    let reconciler = test_reconciler().await;

    let older = vec![record(1, "alice"), record(2, "bob")];
    let newer = vec![record(2, "bob"), record(3, "carol")];

    let a = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.reconcile(older, Some(10)).await })
    };
    let b = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.reconcile(newer, Some(20)).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    // whichever order they ran in, the newer snapshot is what remains
    assert_eq!(mirror_ids(&reconciler).await, vec![2, 3]);
    assert_eq!(reconciler.last_applied_version().await, Some(20));
}

#[tokio::test]
async fn test_rows_can_swap_usernames_and_emails() {
    let reconciler = test_reconciler().await;
    reconciler
        .reconcile(vec![record(1, "alice"), record(2, "bob")], None)
        .await
        .unwrap();

    let mut first = record(1, "bob");
    first.system_uid = record(1, "alice").system_uid;
    let mut second = record(2, "alice");
    second.system_uid = record(2, "bob").system_uid;
    let result = reconciler
        .reconcile(vec![first.clone(), second.clone()], None)
        .await
        .unwrap();

    assert!(result.skipped.is_empty(), "{:?}", result.warnings);
    assert_eq!(result.updated, 2);
    assert_eq!(reconciler.mirror().get(1).await.unwrap().unwrap(), first);
    assert_eq!(reconciler.mirror().get(2).await.unwrap().unwrap(), second);
}

#[tokio::test]
async fn test_failed_rename_restores_the_previous_name() {
    let reconciler = test_reconciler().await;
    reconciler
        .reconcile(vec![record(1, "alice"), record(2, "bob")], None)
        .await
        .unwrap();

    // the rename is fine but the uid clashes with alice's
    let mut bob = record(2, "robert");
    bob.system_uid = record(1, "alice").system_uid;
    let result = reconciler
        .reconcile(vec![record(1, "alice"), bob], None)
        .await
        .unwrap();

    assert_eq!(result.skipped, vec![2]);
    assert!(!result.warnings[0].contains("could not be restored"));
    assert_eq!(reconciler.mirror().get(2).await.unwrap().unwrap(), record(2, "bob"));
}

#[tokio::test]
async fn test_incompatible_mirror_is_a_hard_failure() {
    let reconciler = test_reconciler().await;
    break_mirror_schema(&reconciler).await;

    let err = reconciler
        .reconcile(vec![record(1, "alice")], Some(5))
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            Error::Sync(SyncError::Schema { .. } | SyncError::Connectivity { .. })
        ),
        "{err:?}"
    );
    assert_eq!(reconciler.state(), ReconcilerState::Failed);
    assert_eq!(reconciler.last_applied_version().await, None);
    assert_eq!(
        broken_mirror_notes(&reconciler).await,
        vec![(7, "keep me".to_string())]
    );
}
