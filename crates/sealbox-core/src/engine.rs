//! Secret lifecycle engine.
//!
//! Enforces the per-(`project_id`, `name`) state machine:
//!
//! ```text
//! UNCREATED --create--> ACTIVE(v=1)
//! ACTIVE(v=n) --rotate--> ACTIVE(v=n+1), old v=n -> inactive + grace period
//! any non-deleted version --soft delete--> DELETED (all versions, one stamp)
//! DELETED --retention elapses--> purged by the sweeper
//! ```
//!
//! Correctness rests on the store transaction plus the database's partial
//! unique index, not on in-process serialization: the pre-flight checks here
//! give good error messages, and the store's conditional writes close the
//! races. A concurrent rotate that loses the race observes
//! [`SecretError::NotActive`] and is expected to re-read and retry.
//!
//! Plaintext handling: the only plaintext this module ever holds is the
//! argument being sealed or the [`Zeroizing`] buffer being returned; nothing
//! is cached, logged, or attached to audit events.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

use sealbox_store::{
    HARD_DELETE_AFTER_DAYS, RotationStamp, SecretStore, SecretVersion, StoreError,
};

use crate::audit::{self, AuditAction, AuditEvent, AuditSink};
use crate::blob::SealedBlob;
use crate::cipher;
use crate::error::SecretError;
use crate::keyring::Keyring;

/// Tunables for version lifecycles.
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    /// How long a superseded version stays decryptable for migrating
    /// consumers.
    pub grace_period: Duration,
    /// Days between soft delete and purge eligibility.
    pub retention_days: i64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::hours(24),
            retention_days: HARD_DELETE_AFTER_DAYS,
        }
    }
}

/// Everything about a version except its payload.
///
/// This is the shape returned by list/rotate/create — ciphertext and
/// plaintext never appear in it.
#[derive(Debug, Clone, Serialize)]
pub struct SecretMetadata {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub version: i32,
    pub active: bool,
    pub rotated_from: Option<Uuid>,
    pub rotation_reason: Option<String>,
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<&SecretVersion> for SecretMetadata {
    fn from(rec: &SecretVersion) -> Self {
        Self {
            id: rec.id,
            project_id: rec.project_id,
            name: rec.name.clone(),
            version: rec.version,
            active: rec.active,
            rotated_from: rec.rotated_from,
            rotation_reason: rec.rotation_reason.clone(),
            grace_period_ends_at: rec.grace_period_ends_at,
            created_by: rec.created_by.clone(),
            created_at: rec.created_at,
            deleted_at: rec.deleted_at,
        }
    }
}

/// Outcome of a soft delete.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteReceipt {
    /// The single timestamp stamped on every version of the name.
    pub deleted_at: DateTime<Utc>,
    /// How many versions were marked.
    pub versions_deleted: u64,
    /// When the sweeper may physically purge the group.
    pub hard_delete_scheduled_at: DateTime<Utc>,
}

/// The secret versioning, encryption, and rotation engine.
pub struct SecretEngine {
    store: Arc<dyn SecretStore>,
    keyring: Arc<Keyring>,
    audit: Arc<dyn AuditSink>,
    policy: LifecyclePolicy,
}

impl SecretEngine {
    /// Create an engine over the given store, keyring, and audit sink.
    #[must_use]
    pub fn new(
        store: Arc<dyn SecretStore>,
        keyring: Arc<Keyring>,
        audit: Arc<dyn AuditSink>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            store,
            keyring,
            audit,
            policy,
        }
    }

    /// Create a named secret at version 1.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::AlreadyExists`] if an active, non-deleted
    /// version with this name exists — whether caught by the pre-flight read
    /// or by the database's partial unique index when two creates race.
    pub async fn create(
        &self,
        project_id: Uuid,
        name: &str,
        plaintext: &[u8],
        actor: &str,
    ) -> Result<SecretMetadata, SecretError> {
        if self.store.find_active(project_id, name).await?.is_some() {
            return Err(SecretError::AlreadyExists {
                project_id,
                name: name.to_owned(),
            });
        }

        let record = SecretVersion {
            id: Uuid::new_v4(),
            project_id,
            name: name.to_owned(),
            ciphertext: self.keyring.seal(plaintext)?.encode(),
            version: 1,
            active: true,
            rotated_from: None,
            rotation_reason: None,
            grace_period_ends_at: None,
            grace_notified_at: None,
            created_by: actor.to_owned(),
            created_at: Utc::now(),
            deleted_at: None,
        };

        match self.store.insert_version(&record).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                // Lost a create race after the pre-flight read.
                return Err(SecretError::AlreadyExists {
                    project_id,
                    name: name.to_owned(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            project_id = %project_id,
            name,
            secret_id = %record.id,
            "secret created"
        );

        Ok(SecretMetadata::from(&record))
    }

    /// Fetch a version's metadata and decrypted plaintext.
    ///
    /// Every successful get is reported to the audit sink as
    /// `secret.accessed`; the event carries the version number, never the
    /// value.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::NotFound`] for missing or soft-deleted
    /// versions; format, key, and tamper errors surface from the codec,
    /// keyring, and cipher unchanged.
    pub async fn get(
        &self,
        id: Uuid,
        actor: &str,
    ) -> Result<(SecretMetadata, Zeroizing<Vec<u8>>), SecretError> {
        let record = self.live_version(id).await?;

        let blob = SealedBlob::decode(&record.ciphertext)?;
        let key = self.keyring.by_version(blob.key_version)?;
        let plaintext = cipher::open(key, &blob.bytes)?;

        audit::emit(
            &self.audit,
            self.event(
                actor,
                AuditAction::Accessed,
                &record,
                serde_json::json!({ "version": record.version }),
            ),
        )
        .await;

        Ok((SecretMetadata::from(&record), plaintext))
    }

    /// Rotate the active version, producing version n+1.
    ///
    /// Within one store transaction: version n+1 is inserted (active, with
    /// `rotated_from` and the optional reason) and version n is deactivated
    /// with `grace_period_ends_at = now + grace period`. The new version's
    /// `created_at` and the old version's grace end derive from the same
    /// timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::NotFound`] for missing/deleted targets and
    /// [`SecretError::NotActive`] if the target is not the currently active
    /// version — including the case where a concurrent rotation wins the
    /// race between the pre-flight read and the transaction.
    pub async fn rotate(
        &self,
        id: Uuid,
        plaintext: &[u8],
        reason: Option<&str>,
        actor: &str,
    ) -> Result<SecretMetadata, SecretError> {
        let current = self.live_version(id).await?;

        if !current.active {
            return Err(SecretError::NotActive {
                id,
                version: current.version,
            });
        }

        let now = Utc::now();
        let new = SecretVersion {
            id: Uuid::new_v4(),
            project_id: current.project_id,
            name: current.name.clone(),
            ciphertext: self.keyring.seal(plaintext)?.encode(),
            version: current.version.saturating_add(1),
            active: true,
            rotated_from: Some(current.id),
            rotation_reason: reason.map(str::to_owned),
            grace_period_ends_at: None,
            grace_notified_at: None,
            created_by: actor.to_owned(),
            created_at: now,
            deleted_at: None,
        };
        let stamp = RotationStamp {
            id: current.id,
            grace_period_ends_at: now + self.policy.grace_period,
        };

        match self.store.insert_rotation(&new, &stamp).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                return Err(SecretError::NotActive {
                    id,
                    version: current.version,
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            project_id = %new.project_id,
            name = %new.name,
            from_version = current.version,
            to_version = new.version,
            "secret rotated"
        );

        audit::emit(
            &self.audit,
            self.event(
                actor,
                AuditAction::Rotated,
                &new,
                serde_json::json!({
                    "from_version": current.version,
                    "to_version": new.version,
                    "superseded_id": current.id,
                    "reason": reason,
                }),
            ),
        )
        .await;

        Ok(SecretMetadata::from(&new))
    }

    /// List all non-deleted versions of a name, newest first.
    ///
    /// Metadata only — no ciphertext, no plaintext. An unknown name yields
    /// an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::Store`] if the store fails.
    pub async fn list_versions(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Vec<SecretMetadata>, SecretError> {
        let versions = self.store.list_versions(project_id, name, false).await?;
        Ok(versions.iter().map(SecretMetadata::from).collect())
    }

    /// Soft-delete every version of the secret the given id belongs to.
    ///
    /// Resolves the version's name, then atomically stamps one `deleted_at`
    /// on every non-deleted version sharing it. The group becomes invisible
    /// to `get`/`list_versions` immediately and purge-eligible after the
    /// retention window.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::NotFound`] if the id is unknown, already
    /// deleted, or (racing another delete) no non-deleted version remains.
    pub async fn soft_delete(&self, id: Uuid, actor: &str) -> Result<DeleteReceipt, SecretError> {
        let record = self.live_version(id).await?;

        let deleted_at = Utc::now();
        let versions_deleted = self
            .store
            .mark_deleted(record.project_id, &record.name, deleted_at)
            .await?;
        if versions_deleted == 0 {
            return Err(SecretError::NotFound { id });
        }

        info!(
            project_id = %record.project_id,
            name = %record.name,
            versions_deleted,
            "secret soft-deleted"
        );

        audit::emit(
            &self.audit,
            self.event(
                actor,
                AuditAction::Deleted,
                &record,
                serde_json::json!({ "versions_deleted": versions_deleted }),
            ),
        )
        .await;

        Ok(DeleteReceipt {
            deleted_at,
            versions_deleted,
            hard_delete_scheduled_at: deleted_at + Duration::days(self.policy.retention_days),
        })
    }

    /// Re-encrypt every non-deleted version of a name under the current key.
    ///
    /// Maintenance operation for after a master-key rotation; the secret's
    /// own version counter is untouched. Returns how many versions were
    /// rewrapped (versions already on the current key are skipped).
    ///
    /// # Errors
    ///
    /// Surfaces format, key, cipher, and store errors; a version whose key
    /// is no longer registered fails the pass rather than being skipped.
    pub async fn rewrap(&self, project_id: Uuid, name: &str) -> Result<u64, SecretError> {
        let versions = self.store.list_versions(project_id, name, false).await?;
        let current = self.keyring.current_version();

        let mut rewrapped = 0u64;
        for record in &versions {
            let blob = SealedBlob::decode(&record.ciphertext)?;
            if blob.key_version == current {
                continue;
            }
            let fresh = self.keyring.rewrap(&blob)?;
            if self
                .store
                .update_ciphertext(record.id, &fresh.encode())
                .await?
            {
                rewrapped = rewrapped.saturating_add(1);
            }
        }

        if rewrapped > 0 {
            info!(
                project_id = %project_id,
                name,
                rewrapped,
                key_version = current,
                "secret versions rewrapped"
            );
        }

        Ok(rewrapped)
    }

    /// Fetch a version that is neither missing nor soft-deleted.
    async fn live_version(&self, id: Uuid) -> Result<SecretVersion, SecretError> {
        match self.store.find_by_id(id).await? {
            Some(record) if record.deleted_at.is_none() => Ok(record),
            _ => Err(SecretError::NotFound { id }),
        }
    }

    fn event(
        &self,
        actor: &str,
        action: AuditAction,
        record: &SecretVersion,
        metadata: serde_json::Value,
    ) -> AuditEvent {
        AuditEvent {
            actor_id: actor.to_owned(),
            action,
            target_id: record.id,
            project_id: record.project_id,
            occurred_at: Utc::now(),
            metadata,
        }
    }
}

impl std::fmt::Debug for SecretEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use sealbox_store::MemoryStore;

    use crate::audit::{FailingSink, MemorySink};
    use crate::cipher::EncryptionKey;

    use super::*;

    fn engine_with(store: MemoryStore, sink: Arc<dyn AuditSink>) -> SecretEngine {
        let keyring = Arc::new(Keyring::new(1, EncryptionKey::generate()));
        SecretEngine::new(Arc::new(store), keyring, sink, LifecyclePolicy::default())
    }

    fn engine() -> (SecretEngine, MemorySink) {
        let sink = MemorySink::new();
        let eng = engine_with(MemoryStore::new(), Arc::new(sink.clone()));
        (eng, sink)
    }

    #[tokio::test]
    async fn create_starts_at_version_one_active() {
        let (eng, _) = engine();
        let project = Uuid::new_v4();
        let meta = eng.create(project, "db-pass", b"hunter2", "alice").await.unwrap();
        assert_eq!(meta.version, 1);
        assert!(meta.active);
        assert_eq!(meta.rotated_from, None);
        assert_eq!(meta.created_by, "alice");
    }

    #[tokio::test]
    async fn create_duplicate_name_fails() {
        let (eng, _) = engine();
        let project = Uuid::new_v4();
        eng.create(project, "db-pass", b"a", "alice").await.unwrap();
        let result = eng.create(project, "db-pass", b"b", "alice").await;
        assert!(matches!(result, Err(SecretError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn get_roundtrips_plaintext_and_audits() {
        let (eng, sink) = engine();
        let project = Uuid::new_v4();
        let meta = eng.create(project, "db-pass", b"hunter2", "alice").await.unwrap();

        let (got, plaintext) = eng.get(meta.id, "bob").await.unwrap();
        assert_eq!(got.version, 1);
        assert_eq!(plaintext.as_slice(), b"hunter2");

        let events = sink.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::Accessed);
        assert_eq!(events[0].actor_id, "bob");
        assert_eq!(events[0].target_id, meta.id);
        // No plaintext anywhere in the event.
        assert!(!events[0].metadata.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let (eng, _) = engine();
        let result = eng.get(Uuid::new_v4(), "alice").await;
        assert!(matches!(result, Err(SecretError::NotFound { .. })));
    }

    #[tokio::test]
    async fn rotate_increments_version_and_stamps_grace() {
        let (eng, sink) = engine();
        let project = Uuid::new_v4();
        let v1 = eng.create(project, "db-pass", b"old", "alice").await.unwrap();

        let v2 = eng
            .rotate(v1.id, b"new", Some("scheduled"), "alice")
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
        assert!(v2.active);
        assert_eq!(v2.rotated_from, Some(v1.id));
        assert_eq!(v2.rotation_reason.as_deref(), Some("scheduled"));

        // Old version: inactive, grace period exactly 24h from the new
        // version's creation instant.
        let versions = eng.list_versions(project, "db-pass").await.unwrap();
        let old = versions.iter().find(|m| m.id == v1.id).unwrap();
        assert!(!old.active);
        assert_eq!(
            old.grace_period_ends_at.unwrap(),
            v2.created_at + Duration::hours(24)
        );

        assert_eq!(sink.actions().await, vec![AuditAction::Rotated]);
    }

    #[tokio::test]
    async fn rotate_stale_version_is_rejected() {
        let (eng, _) = engine();
        let project = Uuid::new_v4();
        let v1 = eng.create(project, "db-pass", b"a", "alice").await.unwrap();
        eng.rotate(v1.id, b"b", None, "alice").await.unwrap();

        // v1 is superseded; rotating it again must fail.
        let result = eng.rotate(v1.id, b"c", None, "alice").await;
        assert!(matches!(result, Err(SecretError::NotActive { version: 1, .. })));
    }

    #[tokio::test]
    async fn versions_are_gapless_with_one_active() {
        let (eng, _) = engine();
        let project = Uuid::new_v4();
        let mut meta = eng.create(project, "db-pass", b"v1", "alice").await.unwrap();
        for i in 2..=5 {
            meta = eng
                .rotate(meta.id, format!("v{i}").as_bytes(), None, "alice")
                .await
                .unwrap();
        }

        let versions = eng.list_versions(project, "db-pass").await.unwrap();
        assert_eq!(
            versions.iter().map(|m| m.version).collect::<Vec<_>>(),
            vec![5, 4, 3, 2, 1]
        );
        assert_eq!(versions.iter().filter(|m| m.active).count(), 1);
        assert!(versions[0].active);
    }

    #[tokio::test]
    async fn list_versions_unknown_name_is_empty() {
        let (eng, _) = engine();
        let versions = eng.list_versions(Uuid::new_v4(), "ghost").await.unwrap();
        assert!(versions.is_empty());
    }

    #[tokio::test]
    async fn soft_delete_cascades_and_schedules_purge() {
        let (eng, sink) = engine();
        let project = Uuid::new_v4();
        let v1 = eng.create(project, "db-pass", b"a", "alice").await.unwrap();
        let v2 = eng.rotate(v1.id, b"b", None, "alice").await.unwrap();

        let receipt = eng.soft_delete(v2.id, "alice").await.unwrap();
        assert_eq!(receipt.versions_deleted, 2);
        assert_eq!(
            receipt.hard_delete_scheduled_at,
            receipt.deleted_at + Duration::days(30)
        );

        // Both versions are now invisible.
        assert!(matches!(
            eng.get(v1.id, "alice").await,
            Err(SecretError::NotFound { .. })
        ));
        assert!(matches!(
            eng.get(v2.id, "alice").await,
            Err(SecretError::NotFound { .. })
        ));
        assert!(eng.list_versions(project, "db-pass").await.unwrap().is_empty());

        assert!(sink.actions().await.contains(&AuditAction::Deleted));
    }

    #[tokio::test]
    async fn soft_delete_twice_is_not_found() {
        let (eng, _) = engine();
        let project = Uuid::new_v4();
        let v1 = eng.create(project, "db-pass", b"a", "alice").await.unwrap();
        eng.soft_delete(v1.id, "alice").await.unwrap();
        let result = eng.soft_delete(v1.id, "alice").await;
        assert!(matches!(result, Err(SecretError::NotFound { .. })));
    }

    #[tokio::test]
    async fn deleted_name_can_be_recreated_at_version_one() {
        let (eng, _) = engine();
        let project = Uuid::new_v4();
        let v1 = eng.create(project, "db-pass", b"a", "alice").await.unwrap();
        eng.soft_delete(v1.id, "alice").await.unwrap();

        let fresh = eng.create(project, "db-pass", b"b", "alice").await.unwrap();
        assert_eq!(fresh.version, 1);
        assert!(fresh.active);
    }

    #[tokio::test]
    async fn audit_failure_never_fails_the_operation() {
        let eng = engine_with(MemoryStore::new(), Arc::new(FailingSink));
        let project = Uuid::new_v4();
        let meta = eng.create(project, "db-pass", b"a", "alice").await.unwrap();
        // get/rotate/delete all emit; none may propagate the sink failure.
        let (_, plaintext) = eng.get(meta.id, "alice").await.unwrap();
        assert_eq!(plaintext.as_slice(), b"a");
        let v2 = eng.rotate(meta.id, b"b", None, "alice").await.unwrap();
        eng.soft_delete(v2.id, "alice").await.unwrap();
    }

    #[tokio::test]
    async fn rewrap_moves_versions_to_current_key() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();

        // Seal v1 under key version 1.
        let old_key = EncryptionKey::generate();
        let old_ring = Arc::new(Keyring::new(1, old_key.clone()));
        let eng_old = SecretEngine::new(
            Arc::new(store.clone()),
            old_ring,
            Arc::new(MemorySink::new()),
            LifecyclePolicy::default(),
        );
        let meta = eng_old.create(project, "db-pass", b"hunter2", "alice").await.unwrap();

        // New engine: key version 2 current, version 1 retired.
        let mut ring = Keyring::new(2, EncryptionKey::generate());
        ring.add_retired(1, old_key).unwrap();
        let eng = SecretEngine::new(
            Arc::new(store),
            Arc::new(ring),
            Arc::new(MemorySink::new()),
            LifecyclePolicy::default(),
        );

        let rewrapped = eng.rewrap(project, "db-pass").await.unwrap();
        assert_eq!(rewrapped, 1);

        // Metadata version is untouched; plaintext still opens.
        let (got, plaintext) = eng.get(meta.id, "alice").await.unwrap();
        assert_eq!(got.version, 1);
        assert_eq!(plaintext.as_slice(), b"hunter2");

        // Second pass is a no-op.
        assert_eq!(eng.rewrap(project, "db-pass").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn get_with_unregistered_key_version_is_key_error() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let eng_old = engine_with(store.clone(), Arc::new(MemorySink::new()));
        let meta = eng_old.create(project, "db-pass", b"a", "alice").await.unwrap();

        // An engine whose keyring only knows version 5 cannot open blobs
        // tagged with version 1.
        let ring = Arc::new(Keyring::new(5, EncryptionKey::generate()));
        let eng = SecretEngine::new(
            Arc::new(store),
            ring,
            Arc::new(MemorySink::new()),
            LifecyclePolicy::default(),
        );
        let result = eng.get(meta.id, "alice").await;
        assert!(matches!(result, Err(SecretError::Key(_))));
    }
}
