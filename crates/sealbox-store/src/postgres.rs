//! PostgreSQL secret store.
//!
//! Stores all versions in a single `secret_versions` table. The
//! one-active-version invariant lives in the database as a partial unique
//! index, so concurrent writers are serialized by the index and the
//! transaction, not by any in-process lock.
//!
//! Feature-gated behind `postgres`. Uses `sqlx` with the Tokio runtime for
//! fully async operations — no `spawn_blocking` needed.
//!
//! Retryable transaction failures (Postgres `40001` serialization failure,
//! `40P01` deadlock) are retried with bounded attempts and exponential
//! backoff before surfacing as [`StoreError::Transaction`]. All other errors
//! propagate unchanged.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::warn;
use uuid::Uuid;

use crate::{PurgeGroup, RotationStamp, SecretStore, SecretVersion, StoreError};

/// Maximum attempts for a retryable transaction.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(50);

const COLUMNS: &str = "id, project_id, name, ciphertext, version, active, rotated_from, \
     rotation_reason, grace_period_ends_at, grace_notified_at, created_by, created_at, deleted_at";

/// A secret store backed by PostgreSQL.
///
/// Thread-safe via `PgPool` (connection pool). All operations are fully async.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool", &"[PgPool]")
            .finish_non_exhaustive()
    }
}

impl PostgresStore {
    /// Connect to PostgreSQL and run the initial migration.
    ///
    /// Creates the `secret_versions` table and its indexes if they do not
    /// exist, including the partial unique index that enforces at most one
    /// active, non-deleted version per (`project_id`, `name`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] if the connection or migration fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Open {
                reason: e.to_string(),
            })?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS secret_versions (\
                id                   UUID        PRIMARY KEY, \
                project_id           UUID        NOT NULL, \
                name                 TEXT        NOT NULL, \
                ciphertext           TEXT        NOT NULL, \
                version              INT         NOT NULL CHECK (version >= 1), \
                active               BOOLEAN     NOT NULL, \
                rotated_from         UUID, \
                rotation_reason      TEXT, \
                grace_period_ends_at TIMESTAMPTZ, \
                grace_notified_at    TIMESTAMPTZ, \
                created_by           TEXT        NOT NULL, \
                created_at           TIMESTAMPTZ NOT NULL, \
                deleted_at           TIMESTAMPTZ\
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Open {
            reason: format!("migration failed: {e}"),
        })?;

        // Version numbers restart when a name is recreated after a soft
        // delete, so uniqueness is scoped to live rows only.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_secret_versions_live_version \
             ON secret_versions (project_id, name, version) \
             WHERE deleted_at IS NULL",
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Open {
            reason: format!("index creation failed: {e}"),
        })?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_secret_versions_one_active \
             ON secret_versions (project_id, name) \
             WHERE active AND deleted_at IS NULL",
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Open {
            reason: format!("index creation failed: {e}"),
        })?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_secret_versions_deleted \
             ON secret_versions (deleted_at) \
             WHERE deleted_at IS NOT NULL",
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Open {
            reason: format!("index creation failed: {e}"),
        })?;

        Ok(Self { pool })
    }

    /// Return a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Single attempt of the two-write rotation transaction.
    async fn rotation_attempt(
        &self,
        new: &SecretVersion,
        superseded: &RotationStamp,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Transaction {
            reason: e.to_string(),
        })?;

        let updated = sqlx::query(
            "UPDATE secret_versions \
             SET active = FALSE, grace_period_ends_at = $1 \
             WHERE id = $2 AND active AND deleted_at IS NULL",
        )
        .bind(superseded.grace_period_ends_at)
        .bind(superseded.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("rotate.deactivate", &e))?;

        if updated.rows_affected() == 0 {
            // The targeted version lost the race — roll back the transaction.
            tx.rollback().await.map_err(|e| StoreError::Transaction {
                reason: e.to_string(),
            })?;
            return Err(StoreError::Conflict {
                reason: "superseded version is no longer active".to_owned(),
            });
        }

        insert_row(&mut *tx, new).await?;

        tx.commit().await.map_err(|e| StoreError::Transaction {
            reason: e.to_string(),
        })
    }

    /// Single attempt of the soft-delete cascade.
    async fn mark_deleted_attempt(
        &self,
        project_id: Uuid,
        name: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE secret_versions SET deleted_at = $1 \
             WHERE project_id = $2 AND name = $3 AND deleted_at IS NULL",
        )
        .bind(deleted_at)
        .bind(project_id)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("mark_deleted", &e))?;

        Ok(result.rows_affected())
    }
}

/// Map a sqlx error onto the store taxonomy.
///
/// Unique violations (`23505`) become [`StoreError::Conflict`]; deadlocks and
/// serialization failures (`40P01`, `40001`) become the retryable
/// [`StoreError::Transaction`]; everything else is a plain query failure.
fn map_db_err(op: &str, e: &sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if let Some(code) = db.code() {
            match code.as_ref() {
                "23505" => {
                    return StoreError::Conflict {
                        reason: db.message().to_owned(),
                    };
                }
                "40001" | "40P01" => {
                    return StoreError::Transaction {
                        reason: db.message().to_owned(),
                    };
                }
                _ => {}
            }
        }
    }
    StoreError::Query {
        op: op.to_owned(),
        reason: e.to_string(),
    }
}

async fn insert_row<'e, E>(executor: E, record: &SecretVersion) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        "INSERT INTO secret_versions (\
            id, project_id, name, ciphertext, version, active, rotated_from, \
            rotation_reason, grace_period_ends_at, grace_notified_at, \
            created_by, created_at, deleted_at\
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(record.id)
    .bind(record.project_id)
    .bind(&record.name)
    .bind(&record.ciphertext)
    .bind(record.version)
    .bind(record.active)
    .bind(record.rotated_from)
    .bind(record.rotation_reason.as_deref())
    .bind(record.grace_period_ends_at)
    .bind(record.grace_notified_at)
    .bind(&record.created_by)
    .bind(record.created_at)
    .bind(record.deleted_at)
    .execute(executor)
    .await
    .map_err(|e| map_db_err("insert_version", &e))?;

    Ok(())
}

/// Retry `op` on retryable transaction failures with exponential backoff.
async fn with_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Err(StoreError::Transaction { reason }) if attempt + 1 < MAX_ATTEMPTS => {
                attempt = attempt.saturating_add(1);
                let delay = BACKOFF_BASE * 2u32.saturating_pow(attempt - 1);
                warn!(op = op_name, attempt, error = %reason, "retrying transaction");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[async_trait::async_trait]
impl SecretStore for PostgresStore {
    async fn insert_version(&self, record: &SecretVersion) -> Result<(), StoreError> {
        with_retry("insert_version", || insert_row(&self.pool, record)).await
    }

    async fn insert_rotation(
        &self,
        new: &SecretVersion,
        superseded: &RotationStamp,
    ) -> Result<(), StoreError> {
        with_retry("insert_rotation", || self.rotation_attempt(new, superseded)).await
    }

    async fn mark_deleted(
        &self,
        project_id: Uuid,
        name: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        with_retry("mark_deleted", || {
            self.mark_deleted_attempt(project_id, name, deleted_at)
        })
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<SecretVersion>, StoreError> {
        sqlx::query_as::<_, SecretVersion>(&format!(
            "SELECT {COLUMNS} FROM secret_versions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("find_by_id", &e))
    }

    async fn find_active(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Option<SecretVersion>, StoreError> {
        sqlx::query_as::<_, SecretVersion>(&format!(
            "SELECT {COLUMNS} FROM secret_versions \
             WHERE project_id = $1 AND name = $2 AND active AND deleted_at IS NULL"
        ))
        .bind(project_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("find_active", &e))
    }

    async fn list_versions(
        &self,
        project_id: Uuid,
        name: &str,
        include_deleted: bool,
    ) -> Result<Vec<SecretVersion>, StoreError> {
        let sql = if include_deleted {
            format!(
                "SELECT {COLUMNS} FROM secret_versions \
                 WHERE project_id = $1 AND name = $2 ORDER BY version DESC"
            )
        } else {
            format!(
                "SELECT {COLUMNS} FROM secret_versions \
                 WHERE project_id = $1 AND name = $2 AND deleted_at IS NULL \
                 ORDER BY version DESC"
            )
        };

        sqlx::query_as::<_, SecretVersion>(&sql)
            .bind(project_id)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("list_versions", &e))
    }

    async fn update_ciphertext(&self, id: Uuid, ciphertext: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE secret_versions SET ciphertext = $1 \
             WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(ciphertext)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("update_ciphertext", &e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn expired_grace_unnotified(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SecretVersion>, StoreError> {
        sqlx::query_as::<_, SecretVersion>(&format!(
            "SELECT {COLUMNS} FROM secret_versions \
             WHERE active = FALSE AND deleted_at IS NULL \
               AND grace_period_ends_at IS NOT NULL AND grace_period_ends_at <= $1 \
               AND grace_notified_at IS NULL"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("expired_grace_unnotified", &e))
    }

    async fn mark_grace_notified(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE secret_versions SET grace_notified_at = $1 \
             WHERE id = $2 AND grace_notified_at IS NULL",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("mark_grace_notified", &e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn hard_delete_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PurgeGroup>, StoreError> {
        sqlx::query_as::<_, PurgeGroup>(
            "SELECT project_id, name, deleted_at, COUNT(*) AS versions \
             FROM secret_versions \
             WHERE deleted_at IS NOT NULL AND deleted_at <= $1 \
             GROUP BY project_id, name, deleted_at \
             ORDER BY deleted_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("hard_delete_candidates", &e))
    }

    async fn purge_group(
        &self,
        project_id: Uuid,
        name: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM secret_versions \
             WHERE project_id = $1 AND name = $2 \
               AND deleted_at IS NOT NULL AND deleted_at <= $3",
        )
        .bind(project_id)
        .bind(name)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("purge_group", &e))?;

        Ok(result.rows_affected())
    }
}
