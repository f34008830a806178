//! # Rekey
//!
//! Identity key rotation, locked versions and shared encrypted resources.
//!
//! ## Overview
//!
//! Every identity has a history of key versions `1..=N`. A session holds a
//! snapshot of the versions its credential can derive and uses it to:
//!
//! - **Renew keys**: append a version endorsed by the previous one, then
//!   re-wrap every group key it can open for the new version
//! - **Unlock**: recover versions locked by a credential change, using an
//!   older credential
//! - **Share**: wrap resource keys per member key version; extend groups
//!   monotonically; act as another identity through its sharing group
//!
//! Administrators can overwrite an identity's keys without the prior
//! credential. Versions the new credential cannot reach become locked.
//!
//! ## Key Concepts
//!
//! - **Authority**: the remote source of truth. Appends are linearized with
//!   reserve/commit; a concurrent append yields `VersionConflict`.
//! - **Snapshot**: immutable; a rotation elsewhere makes it stale and
//!   mutations fail with `StaleKey` until [`Session::refresh`].
//! - **Errors**: every error has a [`kind`](RekeyError::kind) tag and a
//!   JSON [`payload`](RekeyError::payload).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use rekey::{Credential, Identity, ListOptions, MemoryAuthority, RekeyConfig, Session};
//!
//! async fn example() -> rekey::Result<()> {
//!     let authority = Arc::new(MemoryAuthority::new());
//!     let mut alice = Session::register(
//!         authority.clone(),
//!         Identity::user("alice", "Alice"),
//!         Credential::from("correct horse"),
//!         RekeyConfig::default(),
//!     )
//!     .await?;
//!
//!     alice.create_resource("note", Bytes::from_static(b"hello"), &[]).await?;
//!     alice.renew_keys(None).await?;
//!
//!     let notes = alice.list_resources(&ListOptions::default()).await?;
//!     assert_eq!(notes.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `rekey::core` - Logins, versions, public keys, error kinds
//! - `rekey::perms` - Key material, keychains, lock tables, wrappings
//! - `rekey::store` - The authority trait and its in-memory implementation

pub mod admin;
pub mod config;
pub mod error;
pub mod identity;
pub mod lock;
pub mod resource;
pub mod rotation;
pub mod session;
pub mod sharing;

// Re-export component crates
pub use rekey_core as core;
pub use rekey_perms as perms;
pub use rekey_store as store;

// Re-export main types for convenience
pub use admin::AdminSession;
pub use config::RekeyConfig;
pub use error::{RekeyError, Result};
pub use lock::UnlockReport;
pub use resource::{ListOptions, Resource};
pub use rotation::{RenewReport, RewrapReport};
pub use session::{KeySnapshot, Session};
pub use sharing::Assumed;

// Re-export commonly used types
pub use rekey_core::{
    ErrorKind, Identity, IdentityKind, IdentityPublicKey, KeyVersion, LockedVersion, Login,
    ResourceId,
};
pub use rekey_perms::{Credential, GroupId, SharingGroup, VersionState};
pub use rekey_store::{AdminToken, Authority, MemoryAuthority};
