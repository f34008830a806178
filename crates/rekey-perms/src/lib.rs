//! # Rekey Permissions
//!
//! Secret key material, keychains, lock state and group-key wrapping.
//!
//! ## Key Model
//!
//! Every key version has random secrets ([`SecretKeys`]). They are protected
//! three ways:
//!
//! 1. **Credential seal**: sealed under a key derived from the credential
//!    that produced the version.
//! 2. **Keychain links**: a holder version's sealed copy of another version's
//!    secrets. Renewals with the same credential write a chain link, renewals
//!    with a new credential write a recovery link, unlocks write unlock links.
//! 3. **Delegation seal**: sealed under the identity's delegation key, so
//!    members of the identity sharing group can assume the identity.
//!
//! A version is unlocked exactly when the active credential reaches it
//! through seals and non-recovery links. Recovery links are what let an old
//! credential unlock the versions it once produced.
//!
//! ## Encryption Model
//!
//! Resource payloads use a two-layer model:
//!
//! 1. **Resource Key**: a symmetric key (ChaCha20-Poly1305) that encrypts the payload
//! 2. **Wrappings**: the resource key, wrapped per member key version via X25519 ECDH
//!
//! Renewing keys adds wrappings at the new version; the payload is never
//! re-encrypted.

pub mod credential;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod group;
pub mod keychain;
pub mod keys;
pub mod state;
pub mod wrapping;

pub use credential::{Credential, CredentialSalt, CredentialSeal};
pub use crypto::{derive_key, BoxSecret, EncryptionKey, EncryptionNonce, EphemeralKeyPair, SharedKey};
pub use envelope::{EncryptedPayload, EncryptedPayloadBuilder, EncryptionFormat};
pub use error::{PermsError, Result};
pub use group::{GroupId, SharingGroup};
pub use keychain::{Derivation, Keychain};
pub use keys::{
    verify_history, DelegationSeal, KeyHistory, KeyLink, KeyOrigin, LinkKind, SecretKeys,
    VersionRecord,
};
pub use state::{LockTable, LockTransition, VersionState};
pub use wrapping::Wrapping;
