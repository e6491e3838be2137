//! Storage error types.
//!
//! Every error variant carries enough context to diagnose the problem
//! without a debugger. [`StoreError::Conflict`] is the only variant with
//! business meaning: it signals that a conditional write lost a race
//! (duplicate active name, or a rotation target that is no longer active).
//! The lifecycle engine maps it onto its own error taxonomy.

/// Errors that can occur during secret store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to connect to the backend or run the initial migration.
    #[error("failed to open secret store: {reason}")]
    Open { reason: String },

    /// A query failed for a non-retryable reason.
    #[error("query '{op}' failed: {reason}")]
    Query { op: String, reason: String },

    /// A transaction failed for a retryable reason (deadlock, serialization
    /// failure). The Postgres adapter retries these with bounded backoff
    /// before surfacing them.
    #[error("transaction failed: {reason}")]
    Transaction { reason: String },

    /// A conditional write found the expected state gone: a unique
    /// constraint fired or the targeted row was already superseded.
    #[error("write conflict: {reason}")]
    Conflict { reason: String },
}
