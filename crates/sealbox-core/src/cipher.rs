//! Authenticated encryption for Sealbox.
//!
//! Provides AES-256-GCM seal/open over raw bytes and the zeroize-on-drop key
//! newtype. This module knows nothing about secrets, versions, or storage —
//! the key-version tag is prefixed by the [`blob`](crate::blob) codec before
//! anything is persisted.
//!
//! # Security model
//!
//! - Every seal generates a fresh 96-bit nonce via `OsRng`. Nonce reuse under
//!   the same key is a correctness violation, never an option.
//! - Sealed layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! - Key material derives `Zeroize` + `ZeroizeOnDrop`; opened plaintext is
//!   returned as [`Zeroizing`] so it is wiped when the caller drops it.
//! - Nothing in this module logs, echoes, or persists plaintext.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CipherError, KeyringError};

/// Nonce length for AES-256-GCM (96 bits).
pub const NONCE_LEN: usize = 12;

/// Authentication tag length (128 bits).
pub const TAG_LEN: usize = 16;

/// Minimum sealed length: nonce + tag around an empty plaintext.
pub const MIN_SEALED_LEN: usize = NONCE_LEN + TAG_LEN;

/// A 256-bit encryption key that is zeroized on drop.
///
/// The inner bytes are never exposed in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a key from a 64-character hex string (the configuration wire
    /// format for master key material).
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::InvalidMaterial`] if the string is not valid
    /// hex or does not decode to exactly 32 bytes.
    pub fn from_hex(s: &str) -> Result<Self, KeyringError> {
        let decoded = hex::decode(s.trim()).map_err(|e| KeyringError::InvalidMaterial {
            reason: format!("not valid hex: {e}"),
        })?;
        let bytes: [u8; 32] =
            decoded
                .try_into()
                .map_err(|v: Vec<u8>| KeyringError::InvalidMaterial {
                    reason: format!("expected 32 bytes, got {}", v.len()),
                })?;
        Ok(Self(bytes))
    }

    /// Generate a new random key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    ///
    /// Use with care — the caller must not log or persist these bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Seal plaintext under the given key with a fresh random nonce.
///
/// Returns `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
///
/// # Errors
///
/// Returns [`CipherError::Seal`] if the AEAD operation fails.
pub fn seal(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CipherError::Seal {
            reason: e.to_string(),
        })?;

    // nonce || ciphertext (tag appended by aes-gcm)
    let mut sealed = Vec::with_capacity(NONCE_LEN.saturating_add(ciphertext.len()));
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a blob produced by [`seal`].
///
/// The returned plaintext is wrapped in [`Zeroizing`] and wiped from memory
/// when dropped — callers must not copy it out beyond the scope that needs it.
///
/// # Errors
///
/// Returns [`CipherError::TooShort`] if the input is shorter than 28 bytes
/// (nonce + tag minimum), and [`CipherError::Tampered`] if authentication
/// fails — corrupted data, a forged tag, or the wrong key.
pub fn open(key: &EncryptionKey, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    if sealed.len() < MIN_SEALED_LEN {
        return Err(CipherError::TooShort {
            expected: MIN_SEALED_LEN,
            actual: sealed.len(),
        });
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    cipher
        .decrypt(nonce, ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CipherError::Tampered)
}
