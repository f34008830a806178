//! Sealed payload envelope.
//!
//! Everything Rekey hands to the authority in encrypted form (resource
//! payloads, credential seals, keychain links) travels as an
//! [`EncryptedPayload`].

use serde::{Deserialize, Serialize};

use crate::crypto::{EncryptionKey, EncryptionNonce};
use crate::error::{PermsError, Result};

/// Format identifier for encrypted payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncryptionFormat {
    /// ChaCha20-Poly1305 with 256-bit key.
    ChaCha20Poly1305 = 1,
}

/// An encrypted payload envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Encryption algorithm used.
    pub format: EncryptionFormat,

    /// Nonce used for encryption (unique per encryption).
    pub nonce: EncryptionNonce,

    /// The encrypted data (includes authentication tag).
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// Encrypt plaintext with the given key.
    pub fn seal(plaintext: &[u8], key: &EncryptionKey) -> Result<Self> {
        let nonce = EncryptionNonce::generate();
        let ciphertext = key.encrypt(plaintext, &nonce)?;

        Ok(Self {
            format: EncryptionFormat::ChaCha20Poly1305,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt with the given key.
    pub fn open(&self, key: &EncryptionKey) -> Result<Vec<u8>> {
        match self.format {
            EncryptionFormat::ChaCha20Poly1305 => key.decrypt(&self.ciphertext, &self.nonce),
        }
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| PermsError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| PermsError::SerializationError(e.to_string()))
    }
}

/// Builder for a payload protected by a fresh content key.
///
/// The content key is what gets wrapped for each sharing-group member.
pub struct EncryptedPayloadBuilder {
    plaintext: Vec<u8>,
    content_key: EncryptionKey,
}

impl EncryptedPayloadBuilder {
    /// Start building with a freshly generated content key.
    pub fn new(plaintext: impl Into<Vec<u8>>) -> Self {
        Self {
            plaintext: plaintext.into(),
            content_key: EncryptionKey::generate(),
        }
    }

    /// Get the content encryption key.
    pub fn content_key(&self) -> &EncryptionKey {
        &self.content_key
    }

    /// Seal the payload, returning the envelope and its content key.
    pub fn build(self) -> Result<(EncryptedPayload, EncryptionKey)> {
        let envelope = EncryptedPayload::seal(&self.plaintext, &self.content_key)?;
        Ok((envelope, self.content_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = EncryptionKey::generate();
        let envelope = EncryptedPayload::seal(b"hello, sealed world!", &key).unwrap();
        assert_eq!(envelope.open(&key).unwrap(), b"hello, sealed world!");
    }

    #[test]
    fn test_envelope_cbor() {
        let key = EncryptionKey::generate();
        let envelope = EncryptedPayload::seal(b"test", &key).unwrap();

        let recovered = EncryptedPayload::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(envelope, recovered);
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = EncryptedPayload::seal(b"secret", &EncryptionKey::generate()).unwrap();
        assert!(envelope.open(&EncryptionKey::generate()).is_err());
    }

    #[test]
    fn test_builder_returns_matching_key() {
        let builder = EncryptedPayloadBuilder::new(b"resource body".to_vec());
        let expected = builder.content_key().clone();

        let (envelope, key) = builder.build().unwrap();
        assert_eq!(key.as_bytes(), expected.as_bytes());
        assert_eq!(envelope.open(&key).unwrap(), b"resource body");
    }
}
