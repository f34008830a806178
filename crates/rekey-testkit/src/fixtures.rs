//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use rekey::{
    AdminSession, AdminToken, Credential, Identity, KeyVersion, Login, MemoryAuthority,
    RekeyConfig, Session,
};
use rekey_store::Authority;

use crate::faults::FaultyAuthority;

/// A fresh authority plus helpers to populate it.
pub struct TestWorld<A: Authority = MemoryAuthority> {
    pub authority: Arc<A>,
    pub config: RekeyConfig,
    admin_token: AdminToken,
}

impl TestWorld<MemoryAuthority> {
    pub fn new() -> Self {
        Self::with_config(RekeyConfig::default())
    }

    pub fn with_config(config: RekeyConfig) -> Self {
        let authority = MemoryAuthority::new();
        Self {
            admin_token: authority.admin_token(),
            authority: Arc::new(authority),
            config,
        }
    }
}

impl TestWorld<FaultyAuthority> {
    /// A world whose authority can stall or reject calls on demand.
    pub fn faulty(authority: MemoryAuthority, config: RekeyConfig) -> Self {
        Self {
            admin_token: authority.admin_token(),
            authority: Arc::new(FaultyAuthority::new(authority)),
            config,
        }
    }
}

impl<A: Authority> TestWorld<A> {
    /// Register a user identity and return its session.
    pub async fn register(&self, login: &str, credential: &str) -> Session<A> {
        Session::register(
            Arc::clone(&self.authority),
            Identity::user(login, login),
            Credential::from(credential),
            self.config.clone(),
        )
        .await
        .expect("registration failed")
    }

    /// Open a session for an existing identity.
    pub async fn login(
        &self,
        login: &str,
        credential: &str,
    ) -> rekey::Result<Session<A>> {
        Session::login(
            Arc::clone(&self.authority),
            &Login::from(login),
            Credential::from(credential),
            self.config.clone(),
        )
        .await
    }

    /// An administrator session holding the authority's token.
    pub fn admin(&self) -> AdminSession<A> {
        AdminSession::login(
            Arc::clone(&self.authority),
            self.admin_token,
            self.config.clone(),
        )
    }

    /// Locked versions of `login` as raw numbers, ascending.
    pub async fn locked(&self, login: &str) -> Vec<u32> {
        self.authority
            .lock_table(&Login::from(login))
            .await
            .expect("lock table")
            .locked_versions()
            .into_iter()
            .map(KeyVersion::get)
            .collect()
    }

    /// Latest version of `login`.
    pub async fn latest(&self, login: &str) -> u32 {
        self.authority
            .latest_public_key(&Login::from(login))
            .await
            .expect("latest key")
            .version
            .get()
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_login() {
        let world = TestWorld::new();
        let alice = world.register("alice", "pw").await;
        assert_eq!(alice.snapshot().version, KeyVersion(1));

        let again = world.login("alice", "pw").await.unwrap();
        assert_eq!(again.current_login(), alice.current_login());
        assert!(world.login("alice", "wrong").await.is_err());
    }

    #[tokio::test]
    async fn test_admin_overwrite_locks() {
        let world = TestWorld::new();
        world.register("alice", "pw").await;

        world
            .admin()
            .overwrite_keys(&Login::from("alice"), &Credential::from("reset"))
            .await
            .unwrap();
        assert_eq!(world.latest("alice").await, 2);
        assert_eq!(world.locked("alice").await, vec![1]);
    }

    #[tokio::test]
    async fn test_faulty_world_forwards_to_memory() {
        let world = TestWorld::faulty(MemoryAuthority::new(), RekeyConfig::default());
        world.register("alice", "pw").await;
        world
            .admin()
            .overwrite_keys(&Login::from("alice"), &Credential::from("reset"))
            .await
            .unwrap();
        assert_eq!(world.locked("alice").await, vec![1]);
    }
}
