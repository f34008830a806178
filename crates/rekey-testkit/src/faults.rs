//! Fault injection around the in-memory authority.
//!
//! [`FaultyAuthority`] forwards every call to a [`MemoryAuthority`] and can
//! stall history reads (so a caller can be abandoned between reserve and
//! commit) or reject unlock commits.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use rekey_core::{Identity, IdentityPublicKey, KeyVersion, Login, ResourceId};
use rekey_perms::{GroupId, KeyHistory, LockTable, LockTransition, SharingGroup, Wrapping};
use rekey_store::{
    AdminToken, Authority, Expectation, InsertResult, ListedResource, MemoryAuthority,
    NewResource, Page, Registration, Reservation, Result, StoreError, StoredResource,
    UnlockCommit, VersionCommit,
};

/// A [`MemoryAuthority`] with switchable faults.
pub struct FaultyAuthority {
    inner: MemoryAuthority,
    history_delay_ms: AtomicU64,
    failing_unlocks: AtomicUsize,
}

impl FaultyAuthority {
    pub fn new(inner: MemoryAuthority) -> Self {
        Self {
            inner,
            history_delay_ms: AtomicU64::new(0),
            failing_unlocks: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryAuthority {
        &self.inner
    }

    pub fn admin_token(&self) -> AdminToken {
        self.inner.admin_token()
    }

    /// Stall every `history` call by `delay`. `Duration::ZERO` turns it off.
    pub fn delay_history(&self, delay: Duration) {
        self.history_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Reject the next `count` unlock commits without applying them.
    pub fn fail_unlock_commits(&self, count: usize) {
        self.failing_unlocks.store(count, Ordering::SeqCst);
    }

    fn take_unlock_failure(&self) -> bool {
        self.failing_unlocks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Authority for FaultyAuthority {
    async fn register(&self, registration: Registration) -> Result<()> {
        self.inner.register(registration).await
    }

    async fn get_identity(&self, login: &Login) -> Result<Identity> {
        self.inner.get_identity(login).await
    }

    async fn history(&self, login: &Login) -> Result<KeyHistory> {
        let delay = self.history_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.history(login).await
    }

    async fn public_key(&self, login: &Login, version: KeyVersion) -> Result<IdentityPublicKey> {
        self.inner.public_key(login, version).await
    }

    async fn latest_public_key(&self, login: &Login) -> Result<IdentityPublicKey> {
        self.inner.latest_public_key(login).await
    }

    async fn reserve_version(
        &self,
        login: &Login,
        expectation: Expectation,
    ) -> Result<Reservation> {
        self.inner.reserve_version(login, expectation).await
    }

    async fn commit_version(
        &self,
        reservation: Reservation,
        commit: VersionCommit,
    ) -> Result<KeyVersion> {
        self.inner.commit_version(reservation, commit).await
    }

    async fn release_version(&self, reservation: Reservation) -> Result<()> {
        self.inner.release_version(reservation).await
    }

    async fn lock_table(&self, login: &Login) -> Result<LockTable> {
        self.inner.lock_table(login).await
    }

    async fn commit_unlock(&self, login: &Login, commit: UnlockCommit) -> Result<()> {
        if self.take_unlock_failure() {
            return Err(StoreError::Forbidden("unlock commit rejected".into()));
        }
        self.inner.commit_unlock(login, commit).await
    }

    async fn lock_audit(&self, login: &Login) -> Result<Vec<LockTransition>> {
        self.inner.lock_audit(login).await
    }

    async fn put_wrapping(&self, wrapping: Wrapping) -> Result<InsertResult> {
        self.inner.put_wrapping(wrapping).await
    }

    async fn wrappings_for(&self, group: &GroupId, login: &Login) -> Result<Vec<Wrapping>> {
        self.inner.wrappings_for(group, login).await
    }

    async fn members(&self, group: &GroupId) -> Result<SharingGroup> {
        self.inner.members(group).await
    }

    async fn groups_of(&self, login: &Login, page: Page) -> Result<Vec<GroupId>> {
        self.inner.groups_of(login, page).await
    }

    async fn allocate_resource_id(&self) -> Result<ResourceId> {
        self.inner.allocate_resource_id().await
    }

    async fn insert_resource(
        &self,
        resource: NewResource,
        wrappings: Vec<Wrapping>,
    ) -> Result<StoredResource> {
        self.inner.insert_resource(resource, wrappings).await
    }

    async fn get_resource(&self, id: ResourceId) -> Result<StoredResource> {
        self.inner.get_resource(id).await
    }

    async fn list_resources(&self, reader: &Login, page: Page) -> Result<Vec<ListedResource>> {
        self.inner.list_resources(reader, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlock_failures_count_down() {
        let authority = FaultyAuthority::new(MemoryAuthority::new());
        assert!(!authority.take_unlock_failure());

        authority.fail_unlock_commits(2);
        assert!(authority.take_unlock_failure());
        assert!(authority.take_unlock_failure());
        assert!(!authority.take_unlock_failure());
    }
}
