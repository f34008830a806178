//! Error types shared by every Rekey crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{KeyVersion, Login};

/// Stable error kind tag.
///
/// Every error surfaced to callers maps to one of these kinds and carries a
/// structured payload alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ResourceNotFound,
    IdentityNotFound,
    IdentityExists,
    /// A wrapping exists but no unlocked key version can open it.
    ApplicationInvalidToken,
    /// The session key snapshot was superseded by a rotation elsewhere.
    StaleKey,
    /// Another append for the same login is in flight.
    VersionConflict,
    MemberUnreachable,
    InvalidCredential,
    AccessDenied,
    InvalidRecord,
    Crypto,
    Codec,
}

impl ErrorKind {
    /// The tag name used on the wire.
    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::ResourceNotFound => "ResourceNotFound",
            ErrorKind::IdentityNotFound => "IdentityNotFound",
            ErrorKind::IdentityExists => "IdentityExists",
            ErrorKind::ApplicationInvalidToken => "ApplicationInvalidToken",
            ErrorKind::StaleKey => "StaleKey",
            ErrorKind::VersionConflict => "VersionConflict",
            ErrorKind::MemberUnreachable => "MemberUnreachable",
            ErrorKind::InvalidCredential => "InvalidCredential",
            ErrorKind::AccessDenied => "AccessDenied",
            ErrorKind::InvalidRecord => "InvalidRecord",
            ErrorKind::Crypto => "Crypto",
            ErrorKind::Codec => "Codec",
        }
    }

    /// Whether retrying the same call (after a history refetch) can succeed.
    ///
    /// `ApplicationInvalidToken` and `MemberUnreachable` need a credential or
    /// unlock action from the user first.
    pub const fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::VersionConflict)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors from core primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("version gap: expected {expected}, got {got}")]
    VersionGap { expected: KeyVersion, got: KeyVersion },

    #[error("history for {expected} contains a key for {got}")]
    LoginMismatch { expected: Login, got: Login },

    #[error("version {0} is missing its endorsement")]
    MissingEndorsement(KeyVersion),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

impl CoreError {
    /// The error kind tag.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidSignature
            | CoreError::InvalidPublicKey
            | CoreError::MissingEndorsement(_) => ErrorKind::Crypto,
            CoreError::VersionGap { .. } | CoreError::LoginMismatch { .. } => {
                ErrorKind::InvalidRecord
            }
            CoreError::EncodingError(_) | CoreError::DecodingError(_) => ErrorKind::Codec,
        }
    }
}
