//! Audit emitter interface.
//!
//! The lifecycle engine reports every secret access, rotation, deletion, and
//! grace expiry to an [`AuditSink`]. The sink itself — its storage schema,
//! delivery, retention — is an external collaborator; this module only
//! defines the contract plus a tracing-backed sink and an in-memory recorder
//! for tests.
//!
//! Two guarantees the contract makes:
//!
//! - Event metadata NEVER contains a plaintext value — only identifiers,
//!   versions, counts, and reasons.
//! - Emission is best-effort. A sink failure is logged and swallowed; it
//!   must never fail or roll back the lifecycle operation that produced it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AuditError;

/// Lifecycle actions reported to the audit sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A secret's plaintext was successfully read.
    Accessed,
    /// A new version superseded the active one.
    Rotated,
    /// All versions of a name were soft-deleted.
    Deleted,
    /// A superseded version's grace period elapsed.
    GraceExpired,
}

impl AuditAction {
    /// Wire name of the action.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accessed => "secret.accessed",
            Self::Rotated => "secret.rotated",
            Self::Deleted => "secret.deleted",
            Self::GraceExpired => "secret.grace_expired",
        }
    }
}

/// A single lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Who performed the operation (caller-supplied principal id).
    pub actor_id: String,
    /// What happened.
    pub action: AuditAction,
    /// The secret version the operation targeted.
    pub target_id: Uuid,
    /// Tenant scope.
    pub project_id: Uuid,
    /// When the event was produced.
    pub occurred_at: DateTime<Utc>,
    /// Identifiers, versions, counts, reasons — never plaintext.
    pub metadata: serde_json::Value,
}

/// Receives lifecycle events.
///
/// Implementations must be safe to share across async tasks.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    /// The sink's name (for error reporting).
    fn name(&self) -> &str;

    /// Record an event.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Sink`] if the event could not be delivered.
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Best-effort emission: record the event, log and swallow any failure.
pub(crate) async fn emit(sink: &Arc<dyn AuditSink>, event: AuditEvent) {
    if let Err(e) = sink.record(&event).await {
        warn!(
            sink = sink.name(),
            action = event.action.as_str(),
            target_id = %event.target_id,
            error = %e,
            "audit emission failed"
        );
    }
}

/// A sink that writes events to the `tracing` pipeline.
///
/// Useful as a default when no external audit collaborator is wired up yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait::async_trait]
impl AuditSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        info!(
            actor_id = %event.actor_id,
            action = event.action.as_str(),
            target_id = %event.target_id,
            project_id = %event.project_id,
            metadata = %event.metadata,
            "audit event"
        );
        Ok(())
    }
}

/// An in-memory sink that records events for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl MemorySink {
    /// Create a new empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events, in emission order.
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    /// Actions recorded so far, in emission order.
    pub async fn actions(&self) -> Vec<AuditAction> {
        self.events.read().await.iter().map(|e| e.action).collect()
    }
}

#[async_trait::async_trait]
impl AuditSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }
}

/// A sink that always fails, for exercising the best-effort path in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingSink;

#[async_trait::async_trait]
impl AuditSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Sink {
            name: "failing".to_owned(),
            reason: "configured to fail".to_owned(),
        })
    }
}
