//! Error types for `sealbox-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Crypto errors never include key material or plaintext — only
//! key versions, lengths, and operation descriptions.
//!
//! Retry semantics: [`CipherError::Tampered`] and [`KeyringError`] are never
//! retried — a tampered blob is a security event, a missing key is an
//! operator error. [`SecretError::NotActive`] is the one error callers are
//! expected to retry after re-reading current state.

use uuid::Uuid;

use sealbox_store::StoreError;

/// Errors from the AEAD cipher.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// AES-256-GCM encryption failed.
    #[error("sealing failed: {reason}")]
    Seal { reason: String },

    /// Authentication failed on open: the blob was corrupted or forged.
    /// Treat as a security event, not a retryable I/O error.
    #[error("ciphertext authentication failed")]
    Tampered,

    /// The blob is shorter than the minimum `nonce + tag` length.
    #[error("sealed blob too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

/// Errors from decoding the stored `"<key_version>:<base64>"` blob format.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The stored string has no `:` separator.
    #[error("malformed stored blob: missing ':' separator")]
    MissingSeparator,

    /// The key-version tag is not a positive integer.
    #[error("malformed stored blob: invalid key version '{raw}'")]
    InvalidKeyVersion { raw: String },

    /// The payload is not valid base64.
    #[error("malformed stored blob: invalid base64: {reason}")]
    InvalidBase64 { reason: String },
}

/// Errors from the keyring.
#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    /// No key is registered under the requested version.
    #[error("no encryption key registered for version {version}")]
    UnknownVersion { version: u32 },

    /// Key material could not be parsed (misconfigured master key).
    #[error("invalid key material: {reason}")]
    InvalidMaterial { reason: String },

    /// A cipher operation failed during rewrap.
    #[error("keyring cipher error: {0}")]
    Cipher(#[from] CipherError),
}

/// Errors from the secret lifecycle engine.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// The secret does not exist or has been soft-deleted.
    #[error("secret version {id} not found")]
    NotFound { id: Uuid },

    /// An active, non-deleted version with this name already exists.
    #[error("secret '{name}' already exists in project {project_id}")]
    AlreadyExists { project_id: Uuid, name: String },

    /// The rotation target is not the currently active version. Callers
    /// should re-read the active version and retry against it.
    #[error("secret version {id} (v{version}) is not the active version")]
    NotActive { id: Uuid, version: i32 },

    /// A cipher operation failed.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// The stored blob was malformed.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The keyring could not resolve a key.
    #[error(transparent)]
    Key(#[from] KeyringError),

    /// The store returned an error.
    #[error("secret store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from recording an audit event.
///
/// These never propagate out of a lifecycle operation — emission is
/// best-effort and failures are logged and swallowed.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The sink failed to persist the event.
    #[error("audit sink '{name}' failed: {reason}")]
    Sink { name: String, reason: String },
}

/// Errors from loading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing required environment variable {name}")]
    Missing { name: String },

    /// An environment variable is set but unusable.
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}
