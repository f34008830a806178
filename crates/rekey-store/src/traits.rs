//! Authority trait: the remote source of truth for Rekey.
//!
//! The authority owns identity key histories, lock tables, sharing-group
//! wrappings and resources. It never sees a credential or an unwrapped key;
//! clients compute records, links, wrappings and lock transitions and the
//! authority validates and linearizes them.

use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use rekey_core::{Identity, IdentityPublicKey, KeyVersion, Login, ResourceId};
use rekey_perms::{
    DelegationSeal, EncryptedPayload, GroupId, KeyHistory, KeyLink, LockTable, LockTransition,
    SharingGroup, VersionRecord, Wrapping,
};

use crate::error::Result;

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Stored.
    Inserted,
    /// An entry with the same identity already exists (not an error).
    AlreadyExists,
}

/// Credential for administrator-only operations.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdminToken(pub [u8; 32]);

impl AdminToken {
    /// Generate a new random token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AdminToken({}...)", &hex::encode(self.0)[..8])
    }
}

/// What the caller believes when reserving the next version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// A session append: the latest version must still be this one.
    Snapshot(KeyVersion),
    /// An administrator overwrite: no snapshot, but the token must be valid.
    Admin(AdminToken),
}

/// A pending version append for one login.
///
/// At most one live reservation per login exists at any time. A reservation
/// is a lease: once it expires, the next reservation for the login takes it
/// over, and a commit against the lost lease fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub login: Login,
    /// The version the append will receive.
    pub version: KeyVersion,
    /// The latest version when the reservation was taken.
    pub previous: KeyVersion,
    /// Authority-issued ticket that ties the commit to this reservation.
    pub ticket: u64,
}

/// Everything committed with a new version.
#[derive(Debug, Clone)]
pub struct VersionCommit {
    pub record: VersionRecord,
    /// Links held by the new version (chain or recovery).
    pub links: Vec<KeyLink>,
    pub delegation_seal: Option<DelegationSeal>,
    /// Lock table changes, including the new version's own entry.
    pub transitions: Vec<LockTransition>,
}

/// Everything applied by one unlock.
#[derive(Debug, Clone)]
pub struct UnlockCommit {
    /// The unlock is rejected with `StaleKey` unless this is still latest.
    pub expected_latest: KeyVersion,
    /// Unlock links held by `expected_latest`, one per unlocked version.
    pub links: Vec<KeyLink>,
    /// Seals for held versions that had none.
    pub delegation_seals: Vec<DelegationSeal>,
    /// Locked to unlocked, one per link.
    pub transitions: Vec<LockTransition>,
}

/// Registration of a new identity at version 1.
#[derive(Debug, Clone)]
pub struct Registration {
    pub identity: Identity,
    pub record: VersionRecord,
    pub delegation_seal: Option<DelegationSeal>,
    /// Initial wrappings of the identity's delegation key.
    pub wrappings: Vec<Wrapping>,
}

/// Offset/limit window over an ordered listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    /// `None` means unbounded.
    pub limit: Option<usize>,
}

impl Page {
    pub fn new(offset: usize, limit: Option<usize>) -> Self {
        Self { offset, limit }
    }

    /// Apply this window to an iterator.
    pub fn apply<I: Iterator>(&self, iter: I) -> impl Iterator<Item = I::Item> {
        iter.skip(self.offset).take(self.limit.unwrap_or(usize::MAX))
    }
}

/// A resource as submitted for storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResource {
    pub id: ResourceId,
    pub kind: String,
    pub creator: Login,
    pub envelope: EncryptedPayload,
}

/// A stored resource. `created_at` is assigned by the authority and is
/// strictly increasing across resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResource {
    pub id: ResourceId,
    pub kind: String,
    pub creator: Login,
    pub created_at: u64,
    pub envelope: EncryptedPayload,
}

/// A listed resource together with the reader's wrappings for it.
#[derive(Debug, Clone)]
pub struct ListedResource {
    pub resource: StoredResource,
    pub wrappings: Vec<Wrapping>,
}

/// The Authority trait: async interface to the source of truth.
///
/// # Design Notes
///
/// - **Linearized appends**: versions are appended by `reserve_version`
///   followed by `commit_version` (or `release_version`). A second
///   reservation for the same login fails with `VersionConflict` until the
///   first one's lease expires. Administrator reservations preempt.
/// - **Atomic unlocks**: unlock links, delegation seals and lock
///   transitions land together in `commit_unlock`, or not at all.
/// - **Snapshots**: any operation that takes an expected latest version
///   fails with `StaleKey` when the authority has moved on.
/// - **Idempotent puts**: wrappings are keyed by (group, login, version),
///   so re-submitting returns `AlreadyExists`.
#[async_trait]
pub trait Authority: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Identity Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a new identity with its version 1.
    async fn register(&self, registration: Registration) -> Result<()>;

    /// Get an identity.
    async fn get_identity(&self, login: &Login) -> Result<Identity>;

    // ─────────────────────────────────────────────────────────────────────────
    // Key Version Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Full key history: records ascending by version, links, delegation seals.
    async fn history(&self, login: &Login) -> Result<KeyHistory>;

    /// Public key of one version.
    async fn public_key(&self, login: &Login, version: KeyVersion) -> Result<IdentityPublicKey>;

    /// Public key of the latest version.
    async fn latest_public_key(&self, login: &Login) -> Result<IdentityPublicKey>;

    /// Reserve the next version for `login`, taking over an expired lease.
    async fn reserve_version(&self, login: &Login, expectation: Expectation)
        -> Result<Reservation>;

    /// Commit a reserved version. The record, links and lock transitions
    /// are applied atomically.
    async fn commit_version(
        &self,
        reservation: Reservation,
        commit: VersionCommit,
    ) -> Result<KeyVersion>;

    /// Abandon a reservation.
    async fn release_version(&self, reservation: Reservation) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Lock Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Current lock table.
    async fn lock_table(&self, login: &Login) -> Result<LockTable>;

    /// Apply an unlock atomically, provided the latest version is still
    /// `commit.expected_latest`.
    async fn commit_unlock(&self, login: &Login, commit: UnlockCommit) -> Result<()>;

    /// Every transition ever applied, in order.
    async fn lock_audit(&self, login: &Login) -> Result<Vec<LockTransition>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Sharing Group Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a wrapping. Keyed by (group, login, version).
    async fn put_wrapping(&self, wrapping: Wrapping) -> Result<InsertResult>;

    /// All wrappings in `group` addressed to `login`.
    async fn wrappings_for(&self, group: &GroupId, login: &Login) -> Result<Vec<Wrapping>>;

    /// Members of a group: every login holding at least one wrapping.
    async fn members(&self, group: &GroupId) -> Result<SharingGroup>;

    /// Groups in which `login` holds a wrapping.
    async fn groups_of(&self, login: &Login, page: Page) -> Result<Vec<GroupId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Resource Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Allocate a fresh resource id.
    async fn allocate_resource_id(&self) -> Result<ResourceId>;

    /// Store a resource together with its initial wrappings.
    async fn insert_resource(
        &self,
        resource: NewResource,
        wrappings: Vec<Wrapping>,
    ) -> Result<StoredResource>;

    /// Get a resource.
    async fn get_resource(&self, id: ResourceId) -> Result<StoredResource>;

    /// Resources `reader` holds a wrapping for, newest first
    /// (by `created_at`, then id).
    async fn list_resources(&self, reader: &Login, page: Page) -> Result<Vec<ListedResource>>;
}
