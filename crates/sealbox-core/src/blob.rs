//! Stored-blob codec.
//!
//! Persisted ciphertext is the string `"<key_version>:<base64(nonce ||
//! ciphertext || tag)>"`. Rather than splitting strings ad hoc at every call
//! site, the format lives in one tagged struct with explicit fields and
//! bounds-checked decoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::FormatError;

/// A sealed payload tagged with the version of the key that sealed it.
///
/// `bytes` is the raw AEAD output (`nonce || ciphertext || tag`); the cipher
/// validates its length on open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    /// Version of the keyring entry that sealed this payload. Positive.
    pub key_version: u32,
    /// Raw sealed bytes.
    pub bytes: Vec<u8>,
}

impl SealedBlob {
    /// Encode for storage as `"<key_version>:<base64>"`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}:{}", self.key_version, BASE64.encode(&self.bytes))
    }

    /// Decode a stored string.
    ///
    /// # Errors
    ///
    /// - [`FormatError::MissingSeparator`] if there is no `:`.
    /// - [`FormatError::InvalidKeyVersion`] if the prefix is not a positive
    ///   integer.
    /// - [`FormatError::InvalidBase64`] if the payload does not decode.
    pub fn decode(raw: &str) -> Result<Self, FormatError> {
        let (version, payload) = raw.split_once(':').ok_or(FormatError::MissingSeparator)?;

        let key_version: u32 = version.parse().map_err(|_| FormatError::InvalidKeyVersion {
            raw: version.to_owned(),
        })?;
        if key_version == 0 {
            return Err(FormatError::InvalidKeyVersion {
                raw: version.to_owned(),
            });
        }

        let bytes = BASE64
            .decode(payload)
            .map_err(|e| FormatError::InvalidBase64 {
                reason: e.to_string(),
            })?;

        Ok(Self { key_version, bytes })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let blob = SealedBlob {
            key_version: 3,
            bytes: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };
        let encoded = blob.encode();
        assert!(encoded.starts_with("3:"));
        assert_eq!(SealedBlob::decode(&encoded).unwrap(), blob);
    }

    #[test]
    fn missing_separator_is_rejected() {
        assert!(matches!(
            SealedBlob::decode("no-separator-here"),
            Err(FormatError::MissingSeparator)
        ));
    }

    #[test]
    fn zero_key_version_is_rejected() {
        assert!(matches!(
            SealedBlob::decode("0:AAAA"),
            Err(FormatError::InvalidKeyVersion { .. })
        ));
    }

    #[test]
    fn non_numeric_key_version_is_rejected() {
        assert!(matches!(
            SealedBlob::decode("v1:AAAA"),
            Err(FormatError::InvalidKeyVersion { .. })
        ));
    }

    #[test]
    fn negative_key_version_is_rejected() {
        assert!(matches!(
            SealedBlob::decode("-1:AAAA"),
            Err(FormatError::InvalidKeyVersion { .. })
        ));
    }

    #[test]
    fn bad_base64_is_rejected() {
        assert!(matches!(
            SealedBlob::decode("1:not base64!!"),
            Err(FormatError::InvalidBase64 { .. })
        ));
    }

    #[test]
    fn empty_payload_decodes_to_empty_bytes() {
        let blob = SealedBlob::decode("7:").unwrap();
        assert_eq!(blob.key_version, 7);
        assert!(blob.bytes.is_empty());
    }
}
