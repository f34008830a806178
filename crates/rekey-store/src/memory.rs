//! In-memory implementation of the Authority trait.
//!
//! This is the authority used by tests and local tooling. It enforces the
//! same invariants a remote authority must: contiguous versions, one live
//! reservation per login, endorsement checks and lock-table replay.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use rekey_core::{Identity, IdentityPublicKey, KeyVersion, Login, ResourceId};
use rekey_perms::{
    verify_history, GroupId, KeyHistory, KeyOrigin, LinkKind, LockTable, LockTransition,
    SharingGroup, VersionState, Wrapping,
};

use crate::error::{Result, StoreError};
use crate::traits::{
    AdminToken, Authority, Expectation, InsertResult, ListedResource, NewResource, Page,
    Registration, Reservation, StoredResource, UnlockCommit, VersionCommit,
};

/// How long a reservation stays exclusive before another caller may take
/// it over.
pub const DEFAULT_RESERVATION_TTL: Duration = Duration::from_secs(30);

/// In-memory authority.
///
/// All data is lost when the authority is dropped. Thread-safe via RwLock.
pub struct MemoryAuthority {
    admin_token: AdminToken,
    reservation_ttl: Duration,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    identities: HashMap<Login, IdentityEntry>,

    resources: BTreeMap<ResourceId, StoredResource>,

    /// Wrappings per group, keyed by (member, version).
    wrappings: HashMap<GroupId, BTreeMap<(Login, KeyVersion), Wrapping>>,

    /// Index: login -> groups it holds a wrapping in.
    memberships: HashMap<Login, BTreeSet<GroupId>>,

    next_resource_id: u64,
    last_created_at: u64,
    next_ticket: u64,
}

struct IdentityEntry {
    identity: Identity,
    history: KeyHistory,
    locks: LockTable,
    audit: Vec<LockTransition>,
    pending: Option<Lease>,
}

struct Lease {
    reservation: Reservation,
    expires_at: Instant,
}

impl Lease {
    fn holds(&self, reservation: &Reservation) -> bool {
        &self.reservation == reservation
    }
}

impl IdentityEntry {
    fn latest(&self) -> KeyVersion {
        self.history.latest().unwrap_or(KeyVersion(0))
    }

    fn require_version(&self, version: KeyVersion) -> Result<()> {
        if self.history.record(version).is_some() {
            Ok(())
        } else {
            Err(StoreError::VersionNotFound {
                login: self.identity.login.clone(),
                version,
            })
        }
    }
}

impl MemoryAuthority {
    /// Create a new empty authority with a fresh admin token.
    pub fn new() -> Self {
        Self {
            admin_token: AdminToken::generate(),
            reservation_ttl: DEFAULT_RESERVATION_TTL,
            inner: RwLock::new(Inner {
                next_resource_id: 1,
                ..Inner::default()
            }),
        }
    }

    /// Set how long a reservation stays exclusive.
    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    /// The token that authorizes administrator operations.
    pub fn admin_token(&self) -> AdminToken {
        self.admin_token
    }
}

impl Default for MemoryAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn entry(&self, login: &Login) -> Result<&IdentityEntry> {
        self.identities
            .get(login)
            .ok_or_else(|| StoreError::IdentityNotFound(login.clone()))
    }

    fn entry_mut(&mut self, login: &Login) -> Result<&mut IdentityEntry> {
        self.identities
            .get_mut(login)
            .ok_or_else(|| StoreError::IdentityNotFound(login.clone()))
    }

    /// Validate a wrapping against the member's published key.
    fn check_wrapping(&self, wrapping: &Wrapping) -> Result<()> {
        let entry = self
            .identities
            .get(&wrapping.login)
            .ok_or_else(|| StoreError::IdentityNotFound(wrapping.login.clone()))?;
        entry.require_version(wrapping.version)?;

        match &wrapping.group {
            GroupId::Resource(id) if !self.resources.contains_key(id) => {
                Err(StoreError::ResourceNotFound(*id))
            }
            GroupId::Identity(login) if !self.identities.contains_key(login) => {
                Err(StoreError::IdentityNotFound(login.clone()))
            }
            _ => Ok(()),
        }
    }

    fn store_wrapping(&mut self, wrapping: Wrapping) -> InsertResult {
        let slot = (wrapping.login.clone(), wrapping.version);
        let group = self.wrappings.entry(wrapping.group.clone()).or_default();
        if group.contains_key(&slot) {
            return InsertResult::AlreadyExists;
        }

        self.memberships
            .entry(wrapping.login.clone())
            .or_default()
            .insert(wrapping.group.clone());
        group.insert(slot, wrapping);
        InsertResult::Inserted
    }

    fn wrappings_for(&self, group: &GroupId, login: &Login) -> Vec<Wrapping> {
        self.wrappings
            .get(group)
            .map(|members| {
                members
                    .range((login.clone(), KeyVersion(0))..=(login.clone(), KeyVersion(u32::MAX)))
                    .map(|(_, w)| w.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn next_created_at(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.last_created_at = now.max(self.last_created_at + 1);
        self.last_created_at
    }
}

#[async_trait]
impl Authority for MemoryAuthority {
    async fn register(&self, registration: Registration) -> Result<()> {
        let Registration {
            identity,
            record,
            delegation_seal,
            wrappings,
        } = registration;
        let login = identity.login.clone();

        let mut inner = self.inner.write().await;
        if inner.identities.contains_key(&login) {
            return Err(StoreError::IdentityExists(login));
        }
        if record.version() != KeyVersion::FIRST || record.origin != KeyOrigin::Registered {
            return Err(StoreError::InvalidRecord(format!(
                "registration of {} must carry a registered version 1",
                login
            )));
        }
        verify_history(&login, std::slice::from_ref(&record))?;

        let own_group = GroupId::Identity(login.clone());
        for wrapping in &wrappings {
            if wrapping.group != own_group {
                return Err(StoreError::InvalidRecord(
                    "registration wrappings must target the identity group".into(),
                ));
            }
            if wrapping.login == login {
                if wrapping.version != KeyVersion::FIRST {
                    return Err(StoreError::VersionNotFound {
                        login: login.clone(),
                        version: wrapping.version,
                    });
                }
            } else {
                inner.entry(&wrapping.login)?.require_version(wrapping.version)?;
            }
        }

        let mut locks = LockTable::new(login.clone());
        let transitions = locks.plan_recompute(
            KeyVersion::FIRST,
            &BTreeSet::from([KeyVersion::FIRST]),
        );
        locks.apply(&transitions)?;

        let mut history = KeyHistory {
            records: vec![record],
            ..KeyHistory::default()
        };
        history.delegation_seals.extend(delegation_seal);

        inner.identities.insert(
            login.clone(),
            IdentityEntry {
                identity,
                history,
                locks,
                audit: transitions,
                pending: None,
            },
        );
        for wrapping in wrappings {
            inner.store_wrapping(wrapping);
        }

        tracing::info!(login = %login, "identity registered");
        Ok(())
    }

    async fn get_identity(&self, login: &Login) -> Result<Identity> {
        let inner = self.inner.read().await;
        Ok(inner.entry(login)?.identity.clone())
    }

    async fn history(&self, login: &Login) -> Result<KeyHistory> {
        let inner = self.inner.read().await;
        Ok(inner.entry(login)?.history.clone())
    }

    async fn public_key(&self, login: &Login, version: KeyVersion) -> Result<IdentityPublicKey> {
        let inner = self.inner.read().await;
        let entry = inner.entry(login)?;
        entry
            .history
            .record(version)
            .map(|r| r.public_key.clone())
            .ok_or_else(|| StoreError::VersionNotFound {
                login: login.clone(),
                version,
            })
    }

    async fn latest_public_key(&self, login: &Login) -> Result<IdentityPublicKey> {
        let inner = self.inner.read().await;
        let entry = inner.entry(login)?;
        entry
            .history
            .records
            .last()
            .map(|r| r.public_key.clone())
            .ok_or_else(|| StoreError::VersionNotFound {
                login: login.clone(),
                version: KeyVersion::FIRST,
            })
    }

    async fn reserve_version(
        &self,
        login: &Login,
        expectation: Expectation,
    ) -> Result<Reservation> {
        let mut inner = self.inner.write().await;
        inner.next_ticket += 1;
        let ticket = inner.next_ticket;
        let entry = inner.entry_mut(login)?;
        let latest = entry.latest();

        match expectation {
            Expectation::Snapshot(expected) if expected != latest => {
                return Err(StoreError::StaleKey {
                    login: login.clone(),
                    expected,
                    latest,
                });
            }
            Expectation::Admin(token) if token != self.admin_token => {
                return Err(StoreError::Forbidden("invalid admin token".into()));
            }
            _ => {}
        }

        if let Some(lease) = &entry.pending {
            let now = Instant::now();
            if lease.expires_at <= now {
                tracing::warn!(
                    login = %login,
                    ticket = lease.reservation.ticket,
                    "expired reservation taken over"
                );
            } else if matches!(expectation, Expectation::Admin(_)) {
                tracing::warn!(
                    login = %login,
                    ticket = lease.reservation.ticket,
                    "reservation preempted by administrator"
                );
            } else {
                return Err(StoreError::VersionConflict {
                    login: login.clone(),
                });
            }
        }

        let reservation = Reservation {
            login: login.clone(),
            version: latest.next(),
            previous: latest,
            ticket,
        };
        entry.pending = Some(Lease {
            reservation: reservation.clone(),
            expires_at: Instant::now() + self.reservation_ttl,
        });
        Ok(reservation)
    }

    async fn commit_version(
        &self,
        reservation: Reservation,
        commit: VersionCommit,
    ) -> Result<KeyVersion> {
        let mut inner = self.inner.write().await;
        let entry = inner.entry_mut(&reservation.login)?;

        if !entry.pending.as_ref().is_some_and(|lease| lease.holds(&reservation)) {
            // The lease was taken over. Report what the caller can act on.
            let latest = entry.latest();
            return Err(if latest != reservation.previous {
                StoreError::StaleKey {
                    login: reservation.login.clone(),
                    expected: reservation.previous,
                    latest,
                }
            } else {
                StoreError::VersionConflict {
                    login: reservation.login.clone(),
                }
            });
        }
        // Any validation failure below releases the reservation.
        entry.pending = None;

        let VersionCommit {
            record,
            links,
            delegation_seal,
            transitions,
        } = commit;
        let version = reservation.version;

        if record.version() != version {
            return Err(StoreError::InvalidRecord(format!(
                "record carries version {}, reservation is for {}",
                record.version(),
                version
            )));
        }
        if record.origin == KeyOrigin::Overwritten && !links.is_empty() {
            return Err(StoreError::InvalidRecord(
                "an overwritten version holds no links".into(),
            ));
        }
        if links
            .iter()
            .any(|l| l.holder != version || l.target >= version || l.target.get() == 0)
        {
            return Err(StoreError::InvalidRecord(
                "links must be held by the new version and target an earlier one".into(),
            ));
        }
        if delegation_seal.as_ref().is_some_and(|s| s.version != version) {
            return Err(StoreError::InvalidRecord(
                "delegation seal must be for the new version".into(),
            ));
        }

        let mut records = entry.history.records.clone();
        records.push(record);
        verify_history(&reservation.login, &records)?;

        let mut locks = entry.locks.clone();
        locks.apply(&transitions)?;
        if locks.len() != records.len() {
            return Err(StoreError::InvalidRecord(format!(
                "lock table covers {} versions, history has {}",
                locks.len(),
                records.len()
            )));
        }

        entry.history.records = records;
        entry.history.links.extend(links);
        entry.history.delegation_seals.extend(delegation_seal);
        entry.locks = locks;
        entry.audit.extend(transitions);

        tracing::info!(
            login = %reservation.login,
            version = version.get(),
            locked = entry.locks.locked_versions().len(),
            "key version appended"
        );
        Ok(version)
    }

    async fn release_version(&self, reservation: Reservation) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner.entry_mut(&reservation.login)?;
        if entry.pending.as_ref().is_some_and(|lease| lease.holds(&reservation)) {
            entry.pending = None;
        }
        Ok(())
    }

    async fn lock_table(&self, login: &Login) -> Result<LockTable> {
        let inner = self.inner.read().await;
        Ok(inner.entry(login)?.locks.clone())
    }

    async fn commit_unlock(&self, login: &Login, commit: UnlockCommit) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner.entry_mut(login)?;

        let UnlockCommit {
            expected_latest,
            links,
            delegation_seals,
            transitions,
        } = commit;

        let latest = entry.latest();
        if latest != expected_latest {
            return Err(StoreError::StaleKey {
                login: login.clone(),
                expected: expected_latest,
                latest,
            });
        }

        for link in &links {
            if link.kind != LinkKind::Unlock || link.holder != latest {
                return Err(StoreError::InvalidRecord(
                    "unlock links must be held by the latest version".into(),
                ));
            }
            entry.require_version(link.target)?;
        }
        for transition in &transitions {
            let linked = links.iter().any(|l| l.target == transition.version);
            if transition.to != VersionState::Unlocked || !linked {
                return Err(StoreError::InvalidRecord(format!(
                    "version {} cannot be unlocked without an unlock link",
                    transition.version
                )));
            }
        }
        for seal in &delegation_seals {
            entry.require_version(seal.version)?;
        }

        let mut locks = entry.locks.clone();
        locks.apply(&transitions)?;

        for link in links {
            if !entry.history.links.iter().any(|l| l.key() == link.key()) {
                entry.history.links.push(link);
            }
        }
        for seal in delegation_seals {
            if !entry
                .history
                .delegation_seals
                .iter()
                .any(|s| s.version == seal.version)
            {
                entry.history.delegation_seals.push(seal);
            }
        }
        entry.locks = locks;
        entry.audit.extend(transitions);
        Ok(())
    }

    async fn lock_audit(&self, login: &Login) -> Result<Vec<LockTransition>> {
        let inner = self.inner.read().await;
        Ok(inner.entry(login)?.audit.clone())
    }

    async fn put_wrapping(&self, wrapping: Wrapping) -> Result<InsertResult> {
        let mut inner = self.inner.write().await;
        inner.check_wrapping(&wrapping)?;
        Ok(inner.store_wrapping(wrapping))
    }

    async fn wrappings_for(&self, group: &GroupId, login: &Login) -> Result<Vec<Wrapping>> {
        let inner = self.inner.read().await;
        Ok(inner.wrappings_for(group, login))
    }

    async fn members(&self, group: &GroupId) -> Result<SharingGroup> {
        let inner = self.inner.read().await;
        let mut result = SharingGroup::new(group.clone());
        if let Some(members) = inner.wrappings.get(group) {
            result.members = members.keys().map(|(login, _)| login.clone()).collect();
        }
        Ok(result)
    }

    async fn groups_of(&self, login: &Login, page: Page) -> Result<Vec<GroupId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .memberships
            .get(login)
            .map(|groups| page.apply(groups.iter().cloned()).collect())
            .unwrap_or_default())
    }

    async fn allocate_resource_id(&self) -> Result<ResourceId> {
        let mut inner = self.inner.write().await;
        let id = ResourceId(inner.next_resource_id);
        inner.next_resource_id += 1;
        Ok(id)
    }

    async fn insert_resource(
        &self,
        resource: NewResource,
        wrappings: Vec<Wrapping>,
    ) -> Result<StoredResource> {
        let mut inner = self.inner.write().await;
        let group = GroupId::Resource(resource.id);

        if inner.resources.contains_key(&resource.id) {
            return Err(StoreError::InvalidRecord(format!(
                "resource {} already exists",
                resource.id
            )));
        }
        if resource.id.get() == 0 || resource.id.get() >= inner.next_resource_id {
            return Err(StoreError::InvalidRecord(format!(
                "resource id {} was not allocated",
                resource.id
            )));
        }
        inner.entry(&resource.creator)?;
        for wrapping in &wrappings {
            if wrapping.group != group {
                return Err(StoreError::InvalidRecord(
                    "initial wrappings must target the new resource".into(),
                ));
            }
            let member = inner.entry(&wrapping.login)?;
            member.require_version(wrapping.version)?;
        }

        let stored = StoredResource {
            id: resource.id,
            kind: resource.kind,
            creator: resource.creator,
            created_at: inner.next_created_at(),
            envelope: resource.envelope,
        };
        inner.resources.insert(stored.id, stored.clone());
        for wrapping in wrappings {
            inner.store_wrapping(wrapping);
        }
        Ok(stored)
    }

    async fn get_resource(&self, id: ResourceId) -> Result<StoredResource> {
        let inner = self.inner.read().await;
        inner
            .resources
            .get(&id)
            .cloned()
            .ok_or(StoreError::ResourceNotFound(id))
    }

    async fn list_resources(&self, reader: &Login, page: Page) -> Result<Vec<ListedResource>> {
        let inner = self.inner.read().await;

        let mut visible: Vec<&StoredResource> = inner
            .memberships
            .get(reader)
            .into_iter()
            .flatten()
            .filter_map(|group| match group {
                GroupId::Resource(id) => inner.resources.get(id),
                GroupId::Identity(_) => None,
            })
            .collect();
        visible.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        Ok(page
            .apply(visible.into_iter())
            .map(|resource| ListedResource {
                wrappings: inner.wrappings_for(&GroupId::Resource(resource.id), reader),
                resource: resource.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rekey_perms::{
        Credential, CredentialSeal, EncryptedPayload, EncryptionKey, KeyLink, SecretKeys,
        VersionRecord,
    };

    fn registration(login: &str) -> (Registration, SecretKeys) {
        let login = Login::from(login);
        let secrets = SecretKeys::generate();
        let record = VersionRecord {
            public_key: secrets.public_key(&login, KeyVersion::FIRST),
            origin: KeyOrigin::Registered,
            credential_seal: CredentialSeal::seal(&secrets, &Credential::from("pw")).unwrap(),
            endorsement: None,
        };
        let registration = Registration {
            identity: Identity::user(login, "Test"),
            record,
            delegation_seal: None,
            wrappings: Vec::new(),
        };
        (registration, secrets)
    }

    fn renewal(
        login: &Login,
        version: KeyVersion,
        previous: &SecretKeys,
        locks: &LockTable,
    ) -> (VersionCommit, SecretKeys) {
        let secrets = SecretKeys::generate();
        let public_key = secrets.public_key(login, version);
        let endorsement = Some(previous.sign_keypair().sign(&public_key.endorsement_message()));
        let all: BTreeSet<KeyVersion> = (1..=version.get()).map(KeyVersion).collect();
        let commit = VersionCommit {
            record: VersionRecord {
                public_key,
                origin: KeyOrigin::Renewed,
                credential_seal: CredentialSeal::seal(&secrets, &Credential::from("pw")).unwrap(),
                endorsement,
            },
            links: Vec::new(),
            delegation_seal: None,
            transitions: locks.plan_recompute(version, &all),
        };
        (commit, secrets)
    }

    fn overwrite(
        login: &Login,
        version: KeyVersion,
        locks: &LockTable,
    ) -> (VersionCommit, SecretKeys) {
        let secrets = SecretKeys::generate();
        let commit = VersionCommit {
            record: VersionRecord {
                public_key: secrets.public_key(login, version),
                origin: KeyOrigin::Overwritten,
                credential_seal: CredentialSeal::seal(&secrets, &Credential::from("reset"))
                    .unwrap(),
                endorsement: None,
            },
            links: Vec::new(),
            delegation_seal: None,
            transitions: locks.plan_recompute(version, &BTreeSet::from([version])),
        };
        (commit, secrets)
    }

    #[tokio::test]
    async fn test_register_and_duplicate() {
        let authority = MemoryAuthority::new();
        let (reg, _) = registration("alice");
        authority.register(reg.clone()).await.unwrap();

        let err = authority.register(reg).await.unwrap_err();
        assert!(matches!(err, StoreError::IdentityExists(_)));

        let locks = authority.lock_table(&Login::from("alice")).await.unwrap();
        assert_eq!(locks.state(KeyVersion(1)), Some(VersionState::Unlocked));
    }

    #[tokio::test]
    async fn test_reserve_commit_and_conflict() {
        let authority = MemoryAuthority::new();
        let (reg, v1) = registration("alice");
        let login = reg.identity.login.clone();
        authority.register(reg).await.unwrap();

        let reservation = authority
            .reserve_version(&login, Expectation::Snapshot(KeyVersion(1)))
            .await
            .unwrap();
        assert_eq!(reservation.version, KeyVersion(2));

        let err = authority
            .reserve_version(&login, Expectation::Snapshot(KeyVersion(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        let locks = authority.lock_table(&login).await.unwrap();
        let (commit, v2) = renewal(&login, KeyVersion(2), &v1, &locks);
        let version = authority.commit_version(reservation, commit).await.unwrap();
        assert_eq!(version, KeyVersion(2));

        let stored = authority.public_key(&login, KeyVersion(2)).await.unwrap();
        assert!(v2.matches(&stored));
        let err = authority.public_key(&login, KeyVersion(3)).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionNotFound { .. }));

        let err = authority
            .reserve_version(&login, Expectation::Snapshot(KeyVersion(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StaleKey { .. }));

        let history = authority.history(&login).await.unwrap();
        assert_eq!(history.latest(), Some(KeyVersion(2)));
    }

    #[tokio::test]
    async fn test_commit_rejects_unendorsed_renewal() {
        let authority = MemoryAuthority::new();
        let (reg, _) = registration("alice");
        let login = reg.identity.login.clone();
        authority.register(reg).await.unwrap();

        let reservation = authority
            .reserve_version(&login, Expectation::Snapshot(KeyVersion(1)))
            .await
            .unwrap();
        let locks = authority.lock_table(&login).await.unwrap();
        let (mut commit, _) = renewal(&login, KeyVersion(2), &SecretKeys::generate(), &locks);
        commit.record.endorsement = None;

        assert!(authority.commit_version(reservation, commit).await.is_err());
        // The failed commit released the reservation.
        authority
            .reserve_version(&login, Expectation::Snapshot(KeyVersion(1)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_admin_reservation_requires_token() {
        let authority = MemoryAuthority::new();
        let (reg, _) = registration("alice");
        let login = reg.identity.login.clone();
        authority.register(reg).await.unwrap();

        let err = authority
            .reserve_version(&login, Expectation::Admin(AdminToken::generate()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));

        let reservation = authority
            .reserve_version(&login, Expectation::Admin(authority.admin_token()))
            .await
            .unwrap();
        authority.release_version(reservation).await.unwrap();
    }

    #[tokio::test]
    async fn test_resources_listed_newest_first() {
        let authority = MemoryAuthority::new();
        let (reg, _) = registration("alice");
        let login = reg.identity.login.clone();
        let public = reg.record.public_key.clone();
        authority.register(reg).await.unwrap();

        let key = EncryptionKey::generate();
        for i in 0..3 {
            let id = authority.allocate_resource_id().await.unwrap();
            let wrapping = Wrapping::create(GroupId::Resource(id), &key, &public).unwrap();
            authority
                .insert_resource(
                    NewResource {
                        id,
                        kind: "note".into(),
                        creator: login.clone(),
                        envelope: EncryptedPayload::seal(&[i], &key).unwrap(),
                    },
                    vec![wrapping],
                )
                .await
                .unwrap();
        }

        let listed = authority.list_resources(&login, Page::default()).await.unwrap();
        let ids: Vec<u64> = listed.iter().map(|l| l.resource.id.get()).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert!(listed.iter().all(|l| l.wrappings.len() == 1));

        let page = authority
            .list_resources(&login, Page::new(1, Some(1)))
            .await
            .unwrap();
        assert_eq!(page[0].resource.id, ResourceId(2));

        let bob = authority
            .list_resources(&Login::from("bob"), Page::default())
            .await
            .unwrap();
        assert!(bob.is_empty());
    }

    #[tokio::test]
    async fn test_put_wrapping_is_idempotent() {
        let authority = MemoryAuthority::new();
        let (reg, _) = registration("alice");
        let login = reg.identity.login.clone();
        let public = reg.record.public_key.clone();
        authority.register(reg).await.unwrap();

        let group = GroupId::Identity(login.clone());
        let wrapping = Wrapping::create(group.clone(), &EncryptionKey::generate(), &public).unwrap();
        assert_eq!(
            authority.put_wrapping(wrapping.clone()).await.unwrap(),
            InsertResult::Inserted
        );
        assert_eq!(
            authority.put_wrapping(wrapping).await.unwrap(),
            InsertResult::AlreadyExists
        );

        let members = authority.members(&group).await.unwrap();
        assert!(members.contains(&login));
        let groups = authority.groups_of(&login, Page::default()).await.unwrap();
        assert_eq!(groups, vec![group]);
    }

    #[tokio::test]
    async fn test_expired_reservation_is_taken_over() {
        let authority = MemoryAuthority::new().with_reservation_ttl(Duration::from_millis(5));
        let (reg, v1) = registration("alice");
        let login = reg.identity.login.clone();
        authority.register(reg).await.unwrap();

        let abandoned = authority
            .reserve_version(&login, Expectation::Snapshot(KeyVersion(1)))
            .await
            .unwrap();
        let err = authority
            .reserve_version(&login, Expectation::Snapshot(KeyVersion(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let current = authority
            .reserve_version(&login, Expectation::Snapshot(KeyVersion(1)))
            .await
            .unwrap();
        assert_eq!(current.version, KeyVersion(2));
        assert_ne!(current.ticket, abandoned.ticket);

        // The lost lease can no longer commit.
        let locks = authority.lock_table(&login).await.unwrap();
        let (late, _) = renewal(&login, KeyVersion(2), &v1, &locks);
        let err = authority.commit_version(abandoned, late).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        let (commit, _) = renewal(&login, KeyVersion(2), &v1, &locks);
        authority.commit_version(current, commit).await.unwrap();
        assert_eq!(authority.latest_public_key(&login).await.unwrap().version, KeyVersion(2));
    }

    #[tokio::test]
    async fn test_admin_preempts_live_reservation() {
        let authority = MemoryAuthority::new();
        let (reg, v1) = registration("alice");
        let login = reg.identity.login.clone();
        authority.register(reg).await.unwrap();

        let held = authority
            .reserve_version(&login, Expectation::Snapshot(KeyVersion(1)))
            .await
            .unwrap();
        let admin = authority
            .reserve_version(&login, Expectation::Admin(authority.admin_token()))
            .await
            .unwrap();

        let locks = authority.lock_table(&login).await.unwrap();
        let (commit, _) = overwrite(&login, KeyVersion(2), &locks);
        authority.commit_version(admin, commit).await.unwrap();

        let (late, _) = renewal(&login, KeyVersion(2), &v1, &locks);
        let err = authority.commit_version(held, late).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleKey { .. }));
    }

    #[tokio::test]
    async fn test_unlock_commit_is_all_or_nothing() {
        let authority = MemoryAuthority::new();
        let (reg, v1) = registration("alice");
        let login = reg.identity.login.clone();
        authority.register(reg).await.unwrap();

        let reservation = authority
            .reserve_version(&login, Expectation::Admin(authority.admin_token()))
            .await
            .unwrap();
        let locks = authority.lock_table(&login).await.unwrap();
        let (commit, v2) = overwrite(&login, KeyVersion(2), &locks);
        authority.commit_version(reservation, commit).await.unwrap();

        let locks = authority.lock_table(&login).await.unwrap();
        assert_eq!(locks.locked_versions(), vec![KeyVersion(1)]);
        let transitions = locks.plan_unlock(&BTreeSet::from([KeyVersion(1)]));
        let link = KeyLink::create(LinkKind::Unlock, KeyVersion(2), &v2, KeyVersion(1), &v1)
            .unwrap();

        let unlinked = UnlockCommit {
            expected_latest: KeyVersion(2),
            links: Vec::new(),
            delegation_seals: Vec::new(),
            transitions: transitions.clone(),
        };
        let err = authority.commit_unlock(&login, unlinked).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));

        let stale = UnlockCommit {
            expected_latest: KeyVersion(1),
            links: vec![link.clone()],
            delegation_seals: Vec::new(),
            transitions: transitions.clone(),
        };
        let err = authority.commit_unlock(&login, stale).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleKey { .. }));

        // Neither rejected commit left anything behind.
        assert!(authority.history(&login).await.unwrap().links.is_empty());
        assert_eq!(
            authority.lock_table(&login).await.unwrap().locked_versions(),
            vec![KeyVersion(1)]
        );

        let commit = UnlockCommit {
            expected_latest: KeyVersion(2),
            links: vec![link.clone()],
            delegation_seals: Vec::new(),
            transitions,
        };
        authority.commit_unlock(&login, commit).await.unwrap();
        assert_eq!(authority.history(&login).await.unwrap().links, vec![link]);
        assert!(authority.lock_table(&login).await.unwrap().is_unlocked(KeyVersion(1)));
    }
}
