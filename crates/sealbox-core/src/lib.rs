//! Core library for Sealbox.
//!
//! Contains the AEAD cipher, the sealed-blob storage codec, the versioned
//! keyring, the secret lifecycle engine (create → rotate → grace period →
//! soft delete → scheduled hard delete), the expiry sweeper, and the audit
//! emitter interface. This crate depends on `sealbox-store` for the
//! transactional row store and knows nothing about HTTP, authentication, or
//! tenant authorization — those belong to the calling layer.

pub mod audit;
pub mod blob;
pub mod cipher;
pub mod config;
pub mod engine;
pub mod error;
pub mod keyring;
pub mod sweeper;
