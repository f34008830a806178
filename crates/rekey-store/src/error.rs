//! Error types for authority operations.

use serde_json::{json, Value};
use thiserror::Error;

use rekey_core::{ErrorKind, KeyVersion, Login, ResourceId};
use rekey_perms::PermsError;

/// Errors returned by an [`Authority`](crate::Authority).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("identity not found: {0}")]
    IdentityNotFound(Login),

    #[error("identity already exists: {0}")]
    IdentityExists(Login),

    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),

    #[error("version {version} of {login} not found")]
    VersionNotFound { login: Login, version: KeyVersion },

    /// The caller's view of the latest version is outdated.
    #[error("stale key for {login}: expected latest {expected}, authority has {latest}")]
    StaleKey {
        login: Login,
        expected: KeyVersion,
        latest: KeyVersion,
    },

    /// Another append for the same login is reserved and not yet committed.
    #[error("version append already in flight for {login}")]
    VersionConflict { login: Login },

    /// A submitted record, link or seal is malformed.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Bad admin token or unknown reservation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Lock table replay or record verification failed.
    #[error("permission error: {0}")]
    Perms(#[from] PermsError),
}

impl StoreError {
    /// The error kind tag.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::IdentityNotFound(_) => ErrorKind::IdentityNotFound,
            StoreError::IdentityExists(_) => ErrorKind::IdentityExists,
            StoreError::ResourceNotFound(_) => ErrorKind::ResourceNotFound,
            StoreError::VersionNotFound { .. } | StoreError::InvalidRecord(_) => {
                ErrorKind::InvalidRecord
            }
            StoreError::StaleKey { .. } => ErrorKind::StaleKey,
            StoreError::VersionConflict { .. } => ErrorKind::VersionConflict,
            StoreError::Forbidden(_) => ErrorKind::AccessDenied,
            StoreError::Perms(e) => e.kind(),
        }
    }

    /// Structured payload that accompanies the kind tag.
    pub fn payload(&self) -> Value {
        match self {
            StoreError::IdentityNotFound(login) | StoreError::IdentityExists(login) => {
                json!({ "login": login })
            }
            StoreError::ResourceNotFound(id) => json!({ "id": id }),
            StoreError::VersionNotFound { login, version } => {
                json!({ "login": login, "version": version })
            }
            StoreError::StaleKey { .. } | StoreError::VersionConflict { .. } => json!({}),
            StoreError::InvalidRecord(reason) | StoreError::Forbidden(reason) => {
                json!({ "reason": reason })
            }
            StoreError::Perms(e) => json!({ "reason": e.to_string() }),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Result type for authority operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payloads_carry_identifiers() {
        let err = StoreError::ResourceNotFound(ResourceId(42));
        assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
        assert_eq!(err.payload(), json!({ "id": 42 }));

        let err = StoreError::IdentityNotFound(Login::from("carol"));
        assert_eq!(err.payload(), json!({ "login": "carol" }));
    }

    #[test]
    fn test_conflict_is_retryable_stale_is_not() {
        let conflict = StoreError::VersionConflict {
            login: Login::from("alice"),
        };
        assert!(conflict.is_retryable());
        assert_eq!(conflict.payload(), json!({}));

        let stale = StoreError::StaleKey {
            login: Login::from("alice"),
            expected: KeyVersion(1),
            latest: KeyVersion(2),
        };
        assert!(!stale.is_retryable());
    }
}
