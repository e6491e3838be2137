//! Full lifecycle walk: create, rotate, grace period, soft delete, sweep.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use sealbox_core::audit::{AuditAction, MemorySink};
use sealbox_core::cipher::EncryptionKey;
use sealbox_core::engine::{LifecyclePolicy, SecretEngine};
use sealbox_core::error::SecretError;
use sealbox_core::keyring::Keyring;
use sealbox_core::sweeper::Sweeper;
use sealbox_store::MemoryStore;

struct Harness {
    engine: SecretEngine,
    sweeper: Sweeper,
    store: MemoryStore,
    sink: MemorySink,
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    let sink = MemorySink::new();
    let engine = SecretEngine::new(
        Arc::new(store.clone()),
        Arc::new(Keyring::new(1, EncryptionKey::generate())),
        Arc::new(sink.clone()),
        LifecyclePolicy::default(),
    );
    let sweeper = Sweeper::new(
        Arc::new(store.clone()),
        Arc::new(sink.clone()),
        Duration::days(30),
        std::time::Duration::from_secs(300),
    );
    Harness {
        engine,
        sweeper,
        store,
        sink,
    }
}

#[tokio::test]
async fn create_rotate_delete_sweep() {
    let h = harness();
    let project = Uuid::new_v4();

    // Create: version 1, active, no grace stamp.
    let v1 = h
        .engine
        .create(project, "db-pass", b"hunter2", "alice")
        .await
        .unwrap();
    assert_eq!(v1.version, 1);
    assert!(v1.active);
    assert!(v1.grace_period_ends_at.is_none());

    // Rotate: version 2 takes over, version 1 enters its grace period.
    let v2 = h
        .engine
        .rotate(v1.id, b"correct horse", Some("scheduled"), "alice")
        .await
        .unwrap();
    assert_eq!(v2.version, 2);
    assert!(v2.active);
    assert_eq!(v2.rotated_from, Some(v1.id));
    assert_eq!(v2.rotation_reason.as_deref(), Some("scheduled"));

    let (v1_meta, v1_plain) = h.engine.get(v1.id, "alice").await.unwrap();
    assert!(!v1_meta.active);
    let grace_end = v1_meta.grace_period_ends_at.unwrap();
    assert_eq!(grace_end, v2.created_at + Duration::hours(24));
    assert_eq!(v1_plain.as_slice(), b"hunter2");

    // Rotating through the stale version 1 handle is refused.
    assert!(matches!(
        h.engine.rotate(v1.id, b"x", None, "mallory").await,
        Err(SecretError::NotActive { .. })
    ));

    // Grace expiry: one notification, the version stays readable.
    let after_grace = Utc::now() + Duration::hours(25);
    let report = h.sweeper.sweep(after_grace).await.unwrap();
    assert_eq!(report.grace_notified, 1);
    assert_eq!(h.sweeper.sweep(after_grace).await.unwrap().grace_notified, 0);
    assert!(h.engine.get(v1.id, "alice").await.is_ok());

    // Soft delete cascades over both versions.
    let receipt = h.engine.soft_delete(v2.id, "alice").await.unwrap();
    assert_eq!(receipt.versions_deleted, 2);
    assert_eq!(
        receipt.hard_delete_scheduled_at,
        receipt.deleted_at + Duration::days(30)
    );
    assert!(matches!(
        h.engine.get(v2.id, "alice").await,
        Err(SecretError::NotFound { .. })
    ));

    // The name is reusable immediately, starting over at version 1.
    let fresh = h
        .engine
        .create(project, "db-pass", b"reborn", "alice")
        .await
        .unwrap();
    assert_eq!(fresh.version, 1);

    // Day 31: the deleted group is purged; the recreated secret survives.
    let report = h
        .sweeper
        .sweep(Utc::now() + Duration::days(31))
        .await
        .unwrap();
    assert_eq!(report.groups_purged, 1);
    assert_eq!(report.versions_purged, 2);
    assert_eq!(h.store.len().await, 1);

    let (_, plain) = h.engine.get(fresh.id, "alice").await.unwrap();
    assert_eq!(plain.as_slice(), b"reborn");

    // The audit trail covers the whole walk.
    let actions = h.sink.actions().await;
    assert!(actions.contains(&AuditAction::Rotated));
    assert!(actions.contains(&AuditAction::GraceExpired));
    assert!(actions.contains(&AuditAction::Deleted));
    assert!(actions.iter().filter(|a| **a == AuditAction::Accessed).count() >= 3);
}

#[tokio::test]
async fn master_key_rotation_with_rewrap() {
    let store = MemoryStore::new();
    let sink = MemorySink::new();
    let old_key = EncryptionKey::generate();

    let engine_v1 = SecretEngine::new(
        Arc::new(store.clone()),
        Arc::new(Keyring::new(1, old_key.clone())),
        Arc::new(sink.clone()),
        LifecyclePolicy::default(),
    );
    let project = Uuid::new_v4();
    let created = engine_v1
        .create(project, "api-token", b"tok_123", "ops")
        .await
        .unwrap();

    // New process generation: key 2 current, key 1 retired.
    let mut ring = Keyring::new(2, EncryptionKey::generate());
    ring.add_retired(1, old_key).unwrap();
    let engine_v2 = SecretEngine::new(
        Arc::new(store.clone()),
        Arc::new(ring),
        Arc::new(sink.clone()),
        LifecyclePolicy::default(),
    );

    // Old ciphertext still opens through the retired key.
    let (_, plain) = engine_v2.get(created.id, "ops").await.unwrap();
    assert_eq!(plain.as_slice(), b"tok_123");

    // Rewrap migrates it to the current key; plaintext is unchanged.
    assert_eq!(engine_v2.rewrap(project, "api-token").await.unwrap(), 1);
    let (_, plain) = engine_v2.get(created.id, "ops").await.unwrap();
    assert_eq!(plain.as_slice(), b"tok_123");
    // A second pass finds nothing left to migrate.
    assert_eq!(engine_v2.rewrap(project, "api-token").await.unwrap(), 0);
}

#[tokio::test]
async fn projects_are_isolated() {
    let h = harness();
    let project_a = Uuid::new_v4();
    let project_b = Uuid::new_v4();

    // Same name in two projects never collides.
    h.engine
        .create(project_a, "db-pass", b"a", "alice")
        .await
        .unwrap();
    let b1 = h
        .engine
        .create(project_b, "db-pass", b"b", "bob")
        .await
        .unwrap();

    // Deleting project B's secret leaves project A's untouched.
    h.engine.soft_delete(b1.id, "bob").await.unwrap();
    let listed = h.engine.list_versions(project_a, "db-pass").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(h.engine.list_versions(project_b, "db-pass").await.unwrap().is_empty());
}
