//! Versioned keyring — the key registry.
//!
//! Exactly one key version is "current" at a time and every new seal uses
//! it; historical versions are retained for decrypt-only use so old
//! ciphertexts remain readable after a master-key rotation. Rotating the
//! keyring never retroactively touches stored secrets — re-encryption under
//! the current key is the explicit [`rewrap`](Keyring::rewrap) maintenance
//! operation.
//!
//! The keyring is constructed once at process start from configuration and
//! passed around by `Arc` for the process lifetime. Key material comes from
//! an external secure store (env var / KMS); this type only resolves
//! versions, it never provisions keys.

use std::collections::HashMap;
use std::fmt;

use zeroize::Zeroizing;

use crate::blob::SealedBlob;
use crate::cipher::{self, EncryptionKey};
use crate::error::{CipherError, KeyringError};

/// Resolves key-version identifiers to key material.
pub struct Keyring {
    current: u32,
    keys: HashMap<u32, EncryptionKey>,
}

impl Keyring {
    /// Create a keyring with a single current key.
    ///
    /// `current_version` must be positive; it is the tag prefixed to every
    /// blob this keyring seals.
    #[must_use]
    pub fn new(current_version: u32, key: EncryptionKey) -> Self {
        let mut keys = HashMap::new();
        keys.insert(current_version, key);
        Self {
            current: current_version,
            keys,
        }
    }

    /// Register a retired key for decrypt-only use.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::InvalidMaterial`] if the version is already
    /// registered — silently replacing key material would make previously
    /// written blobs unreadable.
    pub fn add_retired(&mut self, version: u32, key: EncryptionKey) -> Result<(), KeyringError> {
        if self.keys.contains_key(&version) {
            return Err(KeyringError::InvalidMaterial {
                reason: format!("key version {version} is already registered"),
            });
        }
        self.keys.insert(version, key);
        Ok(())
    }

    /// The current key and its version. All new seals use this.
    #[must_use]
    pub fn current(&self) -> (u32, &EncryptionKey) {
        // The constructor guarantees the current version is present.
        #[allow(clippy::unwrap_used)]
        let key = self.keys.get(&self.current).unwrap();
        (self.current, key)
    }

    /// The current key version.
    #[must_use]
    pub fn current_version(&self) -> u32 {
        self.current
    }

    /// Resolve a key by version, for decrypting older ciphertexts.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::UnknownVersion`] if no key is registered
    /// under `version`.
    pub fn by_version(&self, version: u32) -> Result<&EncryptionKey, KeyringError> {
        self.keys
            .get(&version)
            .ok_or(KeyringError::UnknownVersion { version })
    }

    /// Seal plaintext under the current key, producing a tagged blob.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Seal`] if the AEAD operation fails.
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedBlob, CipherError> {
        let (version, key) = self.current();
        let bytes = cipher::seal(key, plaintext)?;
        Ok(SealedBlob {
            key_version: version,
            bytes,
        })
    }

    /// Open a blob with the key version it names.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::UnknownVersion`] for an unregistered version
    /// and [`KeyringError::Cipher`] if authentication fails.
    pub fn open(&self, blob: &SealedBlob) -> Result<Zeroizing<Vec<u8>>, KeyringError> {
        let key = self.by_version(blob.key_version)?;
        Ok(cipher::open(key, &blob.bytes)?)
    }

    /// Re-encrypt a blob under the current key.
    ///
    /// Round-trips through open then seal; the plaintext exists only inside
    /// this call and is zeroized before returning.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::UnknownVersion`] if the blob names an
    /// unregistered key and [`KeyringError::Cipher`] on any cipher failure.
    pub fn rewrap(&self, blob: &SealedBlob) -> Result<SealedBlob, KeyringError> {
        let plaintext = self.open(blob)?;
        Ok(self.seal(&plaintext)?)
    }
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut versions: Vec<u32> = self.keys.keys().copied().collect();
        versions.sort_unstable();
        f.debug_struct("Keyring")
            .field("current", &self.current)
            .field("versions", &versions)
            .finish_non_exhaustive()
    }
}
