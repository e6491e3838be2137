//! In-memory secret store for testing.
//!
//! Rows live in a `HashMap` behind a `RwLock`. Each mutating operation takes
//! the write lock once and performs all of its checks before touching any
//! row, so the all-or-nothing contract of the trait holds: a conflicting
//! rotation or a duplicate insert returns [`StoreError::Conflict`] with the
//! map unchanged, mirroring a rolled-back Postgres transaction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{PurgeGroup, RotationStamp, SecretStore, SecretVersion, StoreError};

/// An in-memory [`SecretStore`] backed by a `HashMap`.
///
/// Thread-safe and async-compatible. Data is lost when the process exits —
/// use this for unit and integration tests only.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    rows: Arc<RwLock<HashMap<Uuid, SecretVersion>>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored, including soft-deleted ones.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the store holds no rows at all.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

fn conflict(reason: &str) -> StoreError {
    StoreError::Conflict {
        reason: reason.to_owned(),
    }
}

#[async_trait::async_trait]
impl SecretStore for MemoryStore {
    async fn insert_version(&self, record: &SecretVersion) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;

        if rows.contains_key(&record.id) {
            return Err(conflict("id already exists"));
        }

        for row in rows.values() {
            if row.project_id == record.project_id
                && row.name == record.name
                && row.deleted_at.is_none()
            {
                if row.version == record.version {
                    return Err(conflict("version number already exists"));
                }
                if record.active && row.active {
                    return Err(conflict("an active version already exists"));
                }
            }
        }

        rows.insert(record.id, record.clone());
        Ok(())
    }

    async fn insert_rotation(
        &self,
        new: &SecretVersion,
        superseded: &RotationStamp,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;

        // All checks before any mutation — a failure leaves the map as-is.
        let still_active = rows
            .get(&superseded.id)
            .is_some_and(|old| old.active && old.deleted_at.is_none());
        if !still_active {
            return Err(conflict("superseded version is no longer active"));
        }

        if rows.contains_key(&new.id) {
            return Err(conflict("id already exists"));
        }

        if rows.values().any(|row| {
            row.project_id == new.project_id
                && row.name == new.name
                && row.version == new.version
                && row.deleted_at.is_none()
        }) {
            return Err(conflict("version number already exists"));
        }

        if let Some(old) = rows.get_mut(&superseded.id) {
            old.active = false;
            old.grace_period_ends_at = Some(superseded.grace_period_ends_at);
        }
        rows.insert(new.id, new.clone());
        Ok(())
    }

    async fn mark_deleted(
        &self,
        project_id: Uuid,
        name: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let mut marked = 0u64;
        for row in rows.values_mut() {
            if row.project_id == project_id && row.name == name && row.deleted_at.is_none() {
                row.deleted_at = Some(deleted_at);
                marked = marked.saturating_add(1);
            }
        }
        Ok(marked)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<SecretVersion>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_active(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Option<SecretVersion>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|row| {
                row.project_id == project_id
                    && row.name == name
                    && row.active
                    && row.deleted_at.is_none()
            })
            .cloned())
    }

    async fn list_versions(
        &self,
        project_id: Uuid,
        name: &str,
        include_deleted: bool,
    ) -> Result<Vec<SecretVersion>, StoreError> {
        let rows = self.rows.read().await;
        let mut versions: Vec<SecretVersion> = rows
            .values()
            .filter(|row| {
                row.project_id == project_id
                    && row.name == name
                    && (include_deleted || row.deleted_at.is_none())
            })
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    async fn update_ciphertext(&self, id: Uuid, ciphertext: &str) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&id) {
            Some(row) if row.deleted_at.is_none() => {
                row.ciphertext = ciphertext.to_owned();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expired_grace_unnotified(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SecretVersion>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| {
                !row.active
                    && row.deleted_at.is_none()
                    && row.grace_notified_at.is_none()
                    && row.grace_period_ends_at.is_some_and(|ends| ends <= now)
            })
            .cloned()
            .collect())
    }

    async fn mark_grace_notified(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&id) {
            Some(row) if row.grace_notified_at.is_none() => {
                row.grace_notified_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn hard_delete_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PurgeGroup>, StoreError> {
        let rows = self.rows.read().await;
        let mut groups: HashMap<(Uuid, String, DateTime<Utc>), i64> = HashMap::new();
        for row in rows.values() {
            if let Some(deleted_at) = row.deleted_at {
                if deleted_at <= cutoff {
                    *groups
                        .entry((row.project_id, row.name.clone(), deleted_at))
                        .or_insert(0) += 1;
                }
            }
        }
        let mut candidates: Vec<PurgeGroup> = groups
            .into_iter()
            .map(|((project_id, name, deleted_at), versions)| PurgeGroup {
                project_id,
                name,
                deleted_at,
                versions,
            })
            .collect();
        candidates.sort_by_key(|g| g.deleted_at);
        Ok(candidates)
    }

    async fn purge_group(
        &self,
        project_id: Uuid,
        name: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, row| {
            !(row.project_id == project_id
                && row.name == name
                && row.deleted_at.is_some_and(|deleted| deleted <= cutoff))
        });
        Ok((before - rows.len()) as u64)
    }
}
