//! # Rekey Core
//!
//! Pure primitives for Rekey: identities, versioned public keys and the error
//! kind taxonomy.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Login`] - Stable identity handle
//! - [`KeyVersion`] - Generation number of an identity key pair (starts at 1)
//! - [`IdentityPublicKey`] - Public box and sign keys of one version
//! - [`LockedVersion`] - A version not derivable from the active credential
//! - [`ErrorKind`] - Tag carried by every surfaced error

pub mod crypto;
pub mod error;
pub mod identity;
pub mod types;

pub use crypto::{BoxPublicKey, Ed25519Signature, SignKeypair, SignPublicKey};
pub use error::{CoreError, ErrorKind};
pub use identity::{verify_contiguous, Identity, IdentityKind, IdentityPublicKey, LockedVersion};
pub use types::{KeyVersion, Login, ResourceId};
