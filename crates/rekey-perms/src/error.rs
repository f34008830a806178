//! Error types for key material and wrapping.

use rekey_core::{ErrorKind, KeyVersion, Login};
use thiserror::Error;

/// Errors that can occur while sealing, opening or deriving keys.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Encryption error.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Decryption error.
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// No key in the keychain can open a wrapping or seal.
    #[error("no usable key for {login} among {tried} candidate wrappings")]
    NoUsableKey { login: Login, tried: usize },

    /// A record refers to a version that is not in the history.
    #[error("record for {login} references unknown version {version}")]
    UnknownVersion { login: Login, version: KeyVersion },

    /// Only version 1 may carry the registration origin.
    #[error("version {version} of {login} claims to be a registration")]
    UnexpectedRegistration { login: Login, version: KeyVersion },

    /// A keychain link or seal decrypted to material that does not match
    /// the published public keys.
    #[error("key material for {login} {version} does not match its public key")]
    KeyMismatch { login: Login, version: KeyVersion },

    /// A lock transition does not start from the version's current state.
    #[error("lock transition for {login} {version} does not match the lock table")]
    InvalidTransition { login: Login, version: KeyVersion },

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Core error.
    #[error("core error: {0}")]
    CoreError(#[from] rekey_core::CoreError),
}

impl PermsError {
    /// The error kind tag.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PermsError::EncryptionError(_) | PermsError::DecryptionError(_) => ErrorKind::Crypto,
            PermsError::NoUsableKey { .. } => ErrorKind::ApplicationInvalidToken,
            PermsError::UnknownVersion { .. }
            | PermsError::UnexpectedRegistration { .. }
            | PermsError::KeyMismatch { .. }
            | PermsError::InvalidTransition { .. } => ErrorKind::InvalidRecord,
            PermsError::SerializationError(_) => ErrorKind::Codec,
            PermsError::CoreError(e) => e.kind(),
        }
    }
}

/// Result type for key operations.
pub type Result<T> = std::result::Result<T, PermsError>;
