//! Error types for Rekey sessions.

use serde_json::{json, Value};
use thiserror::Error;

use rekey_core::{CoreError, ErrorKind, Login, ResourceId};
use rekey_perms::PermsError;
use rekey_store::StoreError;

/// Errors that can occur during session operations.
///
/// Every error carries a kind tag ([`RekeyError::kind`]) and a structured
/// payload ([`RekeyError::payload`]).
#[derive(Debug, Error)]
pub enum RekeyError {
    /// Authority error.
    #[error("authority error: {0}")]
    Store(#[source] StoreError),

    /// Key material error.
    #[error("permission error: {0}")]
    Permission(#[from] PermsError),

    /// Core primitive error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Resource absent, or the caller holds no wrapping for it.
    #[error("resource not found: {id}")]
    ResourceNotFound { id: ResourceId },

    /// Wrappings exist but no unlocked key version opens them.
    #[error("no unlocked key version can open the resource key")]
    ApplicationInvalidToken,

    /// The session snapshot was superseded by a rotation elsewhere.
    #[error("key snapshot for {login} is stale; refresh the session")]
    StaleKey { login: Login },

    /// A member has no unlocked current key version to wrap for.
    #[error("member {login} has no unlocked current key version")]
    MemberUnreachable { login: Login },

    /// The credential does not open the latest key version.
    #[error("credential does not open the current key version of {login}")]
    InvalidCredential { login: Login },

    /// The session cannot act as `target`.
    #[error("{login} cannot act as {target}")]
    AccessDenied { login: Login, target: Login },

    /// Payload (de)serialization failed.
    #[error("codec error: {0}")]
    Codec(String),
}

impl RekeyError {
    /// Wrap a payload codec error.
    pub fn codec(e: impl std::fmt::Display) -> Self {
        RekeyError::Codec(e.to_string())
    }

    /// The error kind tag.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RekeyError::Store(e) => e.kind(),
            RekeyError::Permission(e) => e.kind(),
            RekeyError::Core(e) => e.kind(),
            RekeyError::ResourceNotFound { .. } => ErrorKind::ResourceNotFound,
            RekeyError::ApplicationInvalidToken => ErrorKind::ApplicationInvalidToken,
            RekeyError::StaleKey { .. } => ErrorKind::StaleKey,
            RekeyError::MemberUnreachable { .. } => ErrorKind::MemberUnreachable,
            RekeyError::InvalidCredential { .. } => ErrorKind::InvalidCredential,
            RekeyError::AccessDenied { .. } => ErrorKind::AccessDenied,
            RekeyError::Codec(_) => ErrorKind::Codec,
        }
    }

    /// Structured payload that accompanies the kind tag.
    pub fn payload(&self) -> Value {
        match self {
            RekeyError::Store(e) => e.payload(),
            RekeyError::Permission(e) => json!({ "reason": e.to_string() }),
            RekeyError::Core(e) => json!({ "reason": e.to_string() }),
            RekeyError::ResourceNotFound { id } => json!({ "id": id }),
            RekeyError::ApplicationInvalidToken | RekeyError::StaleKey { .. } => json!({}),
            RekeyError::MemberUnreachable { login } | RekeyError::InvalidCredential { login } => {
                json!({ "login": login })
            }
            RekeyError::AccessDenied { login, target } => {
                json!({ "login": login, "target": target })
            }
            RekeyError::Codec(reason) => json!({ "reason": reason }),
        }
    }

    /// Whether retrying after a history refetch can succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<StoreError> for RekeyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::StaleKey { login, .. } => RekeyError::StaleKey { login },
            StoreError::ResourceNotFound(id) => RekeyError::ResourceNotFound { id },
            other => RekeyError::Store(other),
        }
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, RekeyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rekey_core::KeyVersion;

    #[test]
    fn test_store_errors_normalized() {
        let err: RekeyError = StoreError::StaleKey {
            login: Login::from("alice"),
            expected: KeyVersion(1),
            latest: KeyVersion(2),
        }
        .into();
        assert!(matches!(err, RekeyError::StaleKey { .. }));

        let err: RekeyError = StoreError::ResourceNotFound(ResourceId(9)).into();
        assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
        assert_eq!(err.payload(), json!({ "id": 9 }));
    }

    #[test]
    fn test_kinds_and_payloads() {
        let err = RekeyError::MemberUnreachable {
            login: Login::from("carol"),
        };
        assert_eq!(err.kind(), ErrorKind::MemberUnreachable);
        assert_eq!(err.payload(), json!({ "login": "carol" }));
        assert!(!err.is_retryable());

        assert_eq!(RekeyError::ApplicationInvalidToken.payload(), json!({}));

        let conflict: RekeyError = StoreError::VersionConflict {
            login: Login::from("alice"),
        }
        .into();
        assert_eq!(conflict.kind(), ErrorKind::VersionConflict);
        assert!(conflict.is_retryable());
    }
}
