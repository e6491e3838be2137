//! Expiry sweeper.
//!
//! A periodic, idempotent background pass with two jobs:
//!
//! - **Grace pass** — superseded versions whose grace period has elapsed are
//!   purely informational (they stay retrievable for audit/compliance), but
//!   each gets exactly one `secret.grace_expired` notification. The
//!   notified-at marker is claimed with a conditional store update, so
//!   concurrent sweeper replicas cannot double-notify.
//! - **Hard-delete pass** — name groups whose `deleted_at` is older than the
//!   retention window are physically purged. All versions of a name were
//!   soft-deleted with one timestamp, so they expire and purge as a group.
//!
//! Every mutation is a conditional update keyed on persisted state — there
//! is no in-memory "already processed" set — which makes runs safe to repeat
//! and safe to execute from multiple processes at once.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use sealbox_store::{SecretStore, StoreError};

use crate::audit::{self, AuditAction, AuditEvent, AuditSink};

/// Consecutive sweep failures before log severity escalates.
const FAILURE_ESCALATION_THRESHOLD: u32 = 5;

/// What one sweep accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Grace-expired notifications emitted (first claim only).
    pub grace_notified: u64,
    /// Name groups physically purged.
    pub groups_purged: u64,
    /// Individual versions physically removed.
    pub versions_purged: u64,
}

/// The background sweeper over a secret store.
pub struct Sweeper {
    store: Arc<dyn SecretStore>,
    audit: Arc<dyn AuditSink>,
    /// Retention between soft delete and purge eligibility.
    retention: Duration,
    /// Delay between sweeps when running as a loop.
    interval: std::time::Duration,
}

impl Sweeper {
    /// Create a sweeper with the given retention window and loop interval.
    #[must_use]
    pub fn new(
        store: Arc<dyn SecretStore>,
        audit: Arc<dyn AuditSink>,
        retention: Duration,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            store,
            audit,
            retention,
            interval,
        }
    }

    /// Run a single sweep as of `now`.
    ///
    /// Callers drive the clock: the loop passes `Utc::now()`, tests pass
    /// whatever instant they need. Purge happens only for groups with
    /// `deleted_at + retention <= now`, never earlier.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered; per-row notification
    /// failures within the grace pass are logged and skipped instead.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();

        // Grace pass: exactly-once notification per expired version.
        for record in self.store.expired_grace_unnotified(now).await? {
            match self.store.mark_grace_notified(record.id, now).await {
                Ok(true) => {
                    audit::emit(
                        &self.audit,
                        AuditEvent {
                            actor_id: "sweeper".to_owned(),
                            action: AuditAction::GraceExpired,
                            target_id: record.id,
                            project_id: record.project_id,
                            occurred_at: now,
                            metadata: serde_json::json!({
                                "version": record.version,
                                "grace_period_ends_at": record.grace_period_ends_at,
                            }),
                        },
                    )
                    .await;
                    report.grace_notified = report.grace_notified.saturating_add(1);
                }
                // Another replica claimed the marker first.
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        secret_id = %record.id,
                        error = %e,
                        "failed to mark grace expiry notified"
                    );
                }
            }
        }

        // Hard-delete pass: purge whole name groups past retention.
        let cutoff = now - self.retention;
        for group in self.store.hard_delete_candidates(cutoff).await? {
            let purged = self
                .store
                .purge_group(group.project_id, &group.name, cutoff)
                .await?;
            if purged > 0 {
                info!(
                    project_id = %group.project_id,
                    name = %group.name,
                    versions = purged,
                    "secret purged after retention window"
                );
                report.groups_purged = report.groups_purged.saturating_add(1);
                report.versions_purged = report.versions_purged.saturating_add(purged);
            }
        }

        Ok(report)
    }

    /// Run the sweep loop until the shutdown channel flips to `true`.
    ///
    /// Failures never stop the loop — they are logged, and a
    /// consecutive-failure counter escalates severity so operators notice
    /// persistent trouble without being spammed on transient blips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        let mut consecutive_failures: u32 = 0;
        info!(interval_secs = self.interval.as_secs(), "expiry sweeper started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep(Utc::now()).await {
                        Ok(report) => {
                            consecutive_failures = 0;
                            if report != SweepReport::default() {
                                info!(
                                    grace_notified = report.grace_notified,
                                    groups_purged = report.groups_purged,
                                    versions_purged = report.versions_purged,
                                    "sweep complete"
                                );
                            }
                        }
                        Err(e) => {
                            consecutive_failures = consecutive_failures.saturating_add(1);
                            if consecutive_failures >= FAILURE_ESCALATION_THRESHOLD {
                                error!(
                                    consecutive_failures,
                                    error = %e,
                                    "sweep failing persistently"
                                );
                            } else {
                                warn!(error = %e, "sweep failed");
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("expiry sweeper shutting down");
                        return;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("retention", &self.retention)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
