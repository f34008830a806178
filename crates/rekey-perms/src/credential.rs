//! Credentials and the seals they open.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{contexts, derive_key, EncryptionKey};
use crate::envelope::EncryptedPayload;
use crate::error::Result;
use crate::keys::SecretKeys;

/// A user-held secret (password or passphrase).
///
/// Never serialized and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a secret string.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Derive the key that protects a credential seal.
    pub fn seal_key(&self, salt: &CredentialSalt) -> EncryptionKey {
        derive_key(contexts::CREDENTIAL, &[&salt.0, self.0.as_bytes()])
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Per-version random salt for the credential seal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSalt(pub [u8; 16]);

impl CredentialSalt {
    /// Generate a new random salt.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// A version's secret keys sealed under the credential that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSeal {
    pub salt: CredentialSalt,
    pub sealed: EncryptedPayload,
}

impl CredentialSeal {
    /// Seal `secrets` under `credential` with a fresh salt.
    pub fn seal(secrets: &SecretKeys, credential: &Credential) -> Result<Self> {
        let salt = CredentialSalt::generate();
        let sealed = secrets.seal(&credential.seal_key(&salt))?;
        Ok(Self { salt, sealed })
    }

    /// Try to open the seal. Fails with a decryption error for any other
    /// credential.
    pub fn open(&self, credential: &Credential) -> Result<SecretKeys> {
        SecretKeys::open(&self.sealed, &credential.seal_key(&self.salt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_opens_only_with_same_credential() {
        let secrets = SecretKeys::generate();
        let seal = CredentialSeal::seal(&secrets, &Credential::from("hunter2")).unwrap();

        let opened = seal.open(&Credential::from("hunter2")).unwrap();
        assert_eq!(opened.box_public(), secrets.box_public());
        assert!(seal.open(&Credential::from("hunter3")).is_err());
    }

    #[test]
    fn test_salt_separates_seal_keys() {
        let credential = Credential::from("same");
        let a = credential.seal_key(&CredentialSalt([1; 16]));
        let b = credential.seal_key(&CredentialSalt([2; 16]));
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_debug_is_redacted() {
        let credential = Credential::from("top secret");
        assert!(!format!("{:?}", credential).contains("secret"));
    }
}
