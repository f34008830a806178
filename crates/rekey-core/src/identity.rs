//! Identities and their versioned public keys.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::crypto::{BoxPublicKey, SignPublicKey};
use crate::error::CoreError;
use crate::types::{KeyVersion, Login};

/// Domain separator for version endorsements.
const ENDORSE_DOMAIN: &[u8] = b"rekey-endorse-v0:";

/// Kind of principal behind a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    User,
    Device,
}

/// A login-addressable principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub login: Login,
    pub name: String,
    pub kind: IdentityKind,
    /// Opaque application payload.
    pub payload: Option<Bytes>,
}

impl Identity {
    /// A user identity with no payload.
    pub fn user(login: impl Into<Login>, name: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            name: name.into(),
            kind: IdentityKind::User,
            payload: None,
        }
    }

    /// A device identity with no payload.
    pub fn device(login: impl Into<Login>, name: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            name: name.into(),
            kind: IdentityKind::Device,
            payload: None,
        }
    }

    /// Attach an opaque payload.
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// Public half of one key version.
///
/// Wire shape: `{ login, version, box, sign }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPublicKey {
    pub login: Login,
    pub version: KeyVersion,
    #[serde(rename = "box")]
    pub box_key: BoxPublicKey,
    pub sign: SignPublicKey,
}

impl IdentityPublicKey {
    /// The message a previous version signs to endorse this one.
    pub fn endorsement_message(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(ENDORSE_DOMAIN.len() + self.login.as_bytes().len() + 69);
        msg.extend_from_slice(ENDORSE_DOMAIN);
        msg.extend_from_slice(self.login.as_bytes());
        msg.push(0);
        msg.extend_from_slice(&self.version.get().to_be_bytes());
        msg.extend_from_slice(self.box_key.as_bytes());
        msg.extend_from_slice(self.sign.as_bytes());
        msg
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

/// A version whose private material is not derivable from the active credential.
///
/// Wire shape: `{ publicKey }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedVersion {
    #[serde(rename = "publicKey")]
    pub public_key: IdentityPublicKey,
}

/// Check that a key history belongs to one login and is exactly `1..=N`.
pub fn verify_contiguous<'a>(
    login: &Login,
    history: impl IntoIterator<Item = &'a IdentityPublicKey>,
) -> Result<(), CoreError> {
    let mut expected = KeyVersion::FIRST;
    for key in history {
        if &key.login != login {
            return Err(CoreError::LoginMismatch {
                expected: login.clone(),
                got: key.login.clone(),
            });
        }
        if key.version != expected {
            return Err(CoreError::VersionGap {
                expected,
                got: key.version,
            });
        }
        expected = expected.next();
    }
    Ok(())
}
