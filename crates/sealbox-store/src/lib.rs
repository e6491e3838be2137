//! Secret version row store for Sealbox.
//!
//! This crate defines the [`SecretStore`] trait — transactional CRUD over the
//! `secret_versions` table and nothing else. Business rules (versioning,
//! grace periods, the one-active-version invariant's *enforcement path*) live
//! in `sealbox-core`; this layer exists purely to make atomicity and query
//! shape explicit and swappable.
//!
//! Two implementations are provided:
//!
//! - [`PostgresStore`] — production backend via `sqlx` (feature `postgres`)
//! - [`MemoryStore`] — in-memory, for testing only
//!
//! Atomicity contract: every multi-row mutation (rotation's two writes,
//! soft-delete's N writes) either fully commits or leaves the store
//! untouched. Sweeper-facing operations are conditional updates so that
//! concurrent sweeper replicas stay idempotent.

mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Retention window between soft delete and physical purge, in days.
pub const HARD_DELETE_AFTER_DAYS: i64 = 30;

/// One persisted version of a named secret.
///
/// `ciphertext` is the encoded sealed blob (`"<key_version>:<base64>"`) and
/// is opaque to this crate. The plaintext never reaches this layer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct SecretVersion {
    /// Opaque unique identifier, immutable.
    pub id: Uuid,
    /// Tenant scope. All queries and uniqueness are scoped by
    /// (`project_id`, `name`).
    pub project_id: Uuid,
    /// Logical secret name, stable across versions.
    pub name: String,
    /// Encoded sealed blob. Never exposed by metadata listings upstream.
    pub ciphertext: String,
    /// Positive, strictly increasing per (`project_id`, `name`), starts at 1.
    pub version: i32,
    /// At most one version per (`project_id`, `name`) is active and
    /// non-deleted at any time — enforced by a partial unique index.
    pub active: bool,
    /// Weak back-reference to the version this one superseded.
    pub rotated_from: Option<Uuid>,
    /// Free text, set only on rotation.
    pub rotation_reason: Option<String>,
    /// Set on the superseded version at rotation time.
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    /// Sweeper marker: when the grace-expired notification was emitted.
    pub grace_notified_at: Option<DateTime<Utc>>,
    /// Provenance.
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker. Once set, the version is logically gone but
    /// retained for the hard-delete retention window.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// The two-field update applied to the superseded version during rotation.
#[derive(Debug, Clone)]
pub struct RotationStamp {
    /// Id of the version being superseded.
    pub id: Uuid,
    /// End of its grace period (`rotation time + grace period`).
    pub grace_period_ends_at: DateTime<Utc>,
}

/// A (`project_id`, `name`) group eligible for physical purge.
///
/// All versions of a name are soft-deleted atomically, so they share one
/// `deleted_at` and expire as a group.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct PurgeGroup {
    pub project_id: Uuid,
    pub name: String,
    pub deleted_at: DateTime<Utc>,
    /// Number of versions in the group.
    pub versions: i64,
}

/// Transactional CRUD over the `secret_versions` table.
///
/// Implementations must be safe to share across async tasks and must not
/// apply business validation — a caller asking for an impossible transition
/// gets [`StoreError::Conflict`] from a constraint or conditional write, not
/// a domain error.
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync + 'static {
    /// Insert a brand-new version row (the create path).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if a unique constraint fires (an
    /// active version with this name already exists, or the version number
    /// is taken).
    async fn insert_version(&self, record: &SecretVersion) -> Result<(), StoreError>;

    /// Atomically insert version n+1 and deactivate version n.
    ///
    /// Runs in a single transaction: the superseded row is updated with
    /// `active = false` and its grace-period end only if it is still active
    /// and non-deleted. If that conditional update matches no row, the whole
    /// transaction rolls back.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the superseded version was no
    /// longer active (a concurrent rotation won the race).
    async fn insert_rotation(
        &self,
        new: &SecretVersion,
        superseded: &RotationStamp,
    ) -> Result<(), StoreError>;

    /// Stamp `deleted_at` on every non-deleted version of a name, atomically.
    ///
    /// Returns the number of versions marked. Zero means no matching
    /// non-deleted version existed.
    async fn mark_deleted(
        &self,
        project_id: Uuid,
        name: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Fetch a version by id, including soft-deleted rows.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<SecretVersion>, StoreError>;

    /// Fetch the single active, non-deleted version of a name.
    async fn find_active(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Option<SecretVersion>, StoreError>;

    /// List all versions of a name, newest first.
    ///
    /// Soft-deleted versions are excluded unless `include_deleted` is set.
    async fn list_versions(
        &self,
        project_id: Uuid,
        name: &str,
        include_deleted: bool,
    ) -> Result<Vec<SecretVersion>, StoreError>;

    /// Replace the stored ciphertext of a non-deleted version (key rewrap).
    ///
    /// Returns `false` if the row is missing or soft-deleted.
    async fn update_ciphertext(&self, id: Uuid, ciphertext: &str) -> Result<bool, StoreError>;

    /// Versions whose grace period has elapsed and that have not yet been
    /// notified: `active = false`, `deleted_at IS NULL`,
    /// `grace_period_ends_at <= now`, `grace_notified_at IS NULL`.
    async fn expired_grace_unnotified(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SecretVersion>, StoreError>;

    /// Conditionally set `grace_notified_at` where it is still unset.
    ///
    /// Returns `true` only for the caller that actually claimed the marker,
    /// which makes the grace-expired notification exactly-once across
    /// concurrent sweeper replicas.
    async fn mark_grace_notified(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Name groups whose `deleted_at` is at or before `cutoff`.
    async fn hard_delete_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PurgeGroup>, StoreError>;

    /// Physically delete every version of a name whose `deleted_at` is at or
    /// before `cutoff`. Conditional and idempotent: a second sweeper replica
    /// purging the same group simply deletes zero rows.
    ///
    /// Returns the number of versions removed.
    async fn purge_group(
        &self,
        project_id: Uuid,
        name: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}
