//! Wrapping a group key for one member at one key version.
//!
//! A wrapping encrypts a symmetric key (resource key or delegation key) to a
//! member's box public key via ephemeral X25519 agreement. The wrap key is
//! bound to `(group, login, version)` so a wrapping cannot be replayed under
//! another group or member.

use serde::{Deserialize, Serialize};

use rekey_core::{BoxPublicKey, IdentityPublicKey, KeyVersion, Login};

use crate::crypto::{BoxSecret, EncryptionKey, EncryptionNonce, EphemeralKeyPair};
use crate::error::{PermsError, Result};
use crate::group::GroupId;

/// A group key wrapped for one member key version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wrapping {
    pub group: GroupId,
    pub login: Login,
    pub version: KeyVersion,

    /// Ephemeral X25519 public key (sender's side of ECDH).
    pub ephemeral_public: BoxPublicKey,

    /// The group key, encrypted with the derived wrap key.
    pub encrypted_key: Vec<u8>,

    pub nonce: EncryptionNonce,
}

impl Wrapping {
    /// Wrap `key` for the member key `recipient`.
    pub fn create(
        group: GroupId,
        key: &EncryptionKey,
        recipient: &IdentityPublicKey,
    ) -> Result<Self> {
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();
        let shared = ephemeral.diffie_hellman(&recipient.box_key);

        let context = wrap_context(&group, &recipient.login, recipient.version);
        let wrap_key = shared.derive_encryption_key(&context);

        let nonce = EncryptionNonce::generate();
        let encrypted_key = wrap_key.encrypt(key.as_bytes(), &nonce)?;

        Ok(Self {
            group,
            login: recipient.login.clone(),
            version: recipient.version,
            ephemeral_public,
            encrypted_key,
            nonce,
        })
    }

    /// Unwrap with the member's box secret for `self.version`.
    pub fn unwrap(&self, recipient_secret: &BoxSecret) -> Result<EncryptionKey> {
        let shared = recipient_secret.diffie_hellman(&self.ephemeral_public);
        let context = wrap_context(&self.group, &self.login, self.version);
        let wrap_key = shared.derive_encryption_key(&context);

        let key_bytes = wrap_key.decrypt(&self.encrypted_key, &self.nonce)?;
        EncryptionKey::from_slice(&key_bytes)
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

fn wrap_context(group: &GroupId, login: &Login, version: KeyVersion) -> Vec<u8> {
    let group_bytes = group.context_bytes();
    let mut context = Vec::with_capacity(group_bytes.len() + login.as_bytes().len() + 6);
    context.extend_from_slice(&(group_bytes.len() as u16).to_be_bytes());
    context.extend_from_slice(&group_bytes);
    context.extend_from_slice(login.as_bytes());
    context.extend_from_slice(&version.get().to_be_bytes());
    context
}
