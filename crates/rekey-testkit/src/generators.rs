//! Proptest generators for rotation sequences.
//!
//! A [`RotationStep`] sequence is replayed against a fresh identity by
//! [`RotationRun`], which records the credential behind every version and
//! the lock table after every step.

use proptest::prelude::*;

use rekey::{Credential, KeyVersion, Login, MemoryAuthority, Session};
use rekey_perms::LockTable;
use rekey_store::Authority;

use crate::fixtures::TestWorld;

/// One rotation applied to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStep {
    /// Renew keeping the credential.
    Renew,
    /// Renew with a credential never used before.
    RenewWithNewCredential,
    /// Administrator overwrite with a credential never used before.
    Overwrite,
}

/// Generate a rotation step.
pub fn rotation_step() -> impl Strategy<Value = RotationStep> {
    prop_oneof![
        Just(RotationStep::Renew),
        Just(RotationStep::RenewWithNewCredential),
        Just(RotationStep::Overwrite),
    ]
}

/// Generate up to `max_len` rotation steps.
pub fn rotation_steps(max_len: usize) -> impl Strategy<Value = Vec<RotationStep>> {
    prop::collection::vec(rotation_step(), 0..=max_len)
}

/// A replay of rotation steps against one identity.
pub struct RotationRun {
    pub world: TestWorld,
    pub login: Login,
    pub session: Session<MemoryAuthority>,
    /// Credential behind each version; index `v - 1`.
    pub credentials: Vec<String>,
    /// Lock table after registration and after each step.
    pub tables: Vec<LockTable>,
}

impl RotationRun {
    /// Register `login` with credential `pw-0`.
    pub async fn start(login: &str) -> Self {
        let world = TestWorld::new();
        let session = world.register(login, "pw-0").await;
        let login = Login::from(login);
        let table = world.authority.lock_table(&login).await.expect("lock table");
        Self {
            world,
            login,
            session,
            credentials: vec!["pw-0".to_string()],
            tables: vec![table],
        }
    }

    /// Register and replay `steps`.
    pub async fn replay(login: &str, steps: &[RotationStep]) -> Self {
        let mut run = Self::start(login).await;
        for step in steps {
            run.apply(*step).await;
        }
        run
    }

    /// Apply one step and record the resulting lock table.
    pub async fn apply(&mut self, step: RotationStep) {
        let current = self.credentials.last().cloned().unwrap_or_default();
        let fresh = format!("pw-{}", self.credentials.len());

        match step {
            RotationStep::Renew => {
                self.session.renew_keys(None).await.expect("renew");
                self.credentials.push(current);
            }
            RotationStep::RenewWithNewCredential => {
                self.session
                    .renew_keys(Some(Credential::from(fresh.as_str())))
                    .await
                    .expect("renew with new credential");
                self.credentials.push(fresh);
            }
            RotationStep::Overwrite => {
                self.world
                    .admin()
                    .overwrite_keys(&self.login, &Credential::from(fresh.as_str()))
                    .await
                    .expect("overwrite");
                self.session = self
                    .world
                    .login(self.login.as_str(), &fresh)
                    .await
                    .expect("login after overwrite");
                self.credentials.push(fresh);
            }
        }

        let table = self.lock_table().await;
        self.tables.push(table);
    }

    pub async fn lock_table(&self) -> LockTable {
        self.world
            .authority
            .lock_table(&self.login)
            .await
            .expect("lock table")
    }
}

/// Run a future to completion on a fresh current-thread runtime.
pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
        .block_on(future)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rekey_core::verify_contiguous;
    use rekey_perms::VersionState;

    fn config() -> ProptestConfig {
        ProptestConfig::with_cases(16)
    }

    proptest! {
        #![proptest_config(config())]

        #[test]
        fn test_history_is_contiguous(steps in rotation_steps(6)) {
            let run = block_on(RotationRun::replay("prop-history", &steps));
            let keys = block_on(run.session.public_key_history(&run.login)).unwrap();

            prop_assert_eq!(keys.len(), steps.len() + 1);
            prop_assert!(verify_contiguous(&run.login, &keys).is_ok());
        }

        #[test]
        fn test_lock_state_follows_credential(steps in rotation_steps(6)) {
            let run = block_on(RotationRun::replay("prop-locks", &steps));

            for (i, step) in steps.iter().enumerate() {
                let before = &run.tables[i];
                let after = &run.tables[i + 1];
                let new_version = KeyVersion::from_index(i + 1);
                prop_assert!(after.is_unlocked(new_version));

                for prior in (0..=i).map(KeyVersion::from_index) {
                    match step {
                        RotationStep::Renew => {
                            prop_assert_eq!(after.state(prior), before.state(prior));
                        }
                        RotationStep::RenewWithNewCredential | RotationStep::Overwrite => {
                            prop_assert_eq!(after.state(prior), Some(VersionState::Locked));
                        }
                    }
                }
            }
        }

        #[test]
        fn test_unlock_is_idempotent(steps in rotation_steps(5), pick in any::<prop::sample::Index>()) {
            let mut run = block_on(RotationRun::replay("prop-unlock", &steps));
            let candidate = Credential::from(pick.get(&run.credentials).as_str());
            let login = run.login.clone();

            let first = block_on(run.session.unlock_versions(&login, &candidate)).unwrap();
            let table = block_on(run.lock_table());
            let second = block_on(run.session.unlock_versions(&login, &candidate)).unwrap();

            prop_assert!(second.unlocked.is_empty());
            prop_assert_eq!(block_on(run.lock_table()), table);
            prop_assert_eq!(second.still_locked, first.still_locked);
        }
    }

    #[test]
    fn test_renew_keeps_prior_unlocked() {
        let run = block_on(RotationRun::replay(
            "renew",
            &[RotationStep::Renew, RotationStep::Renew],
        ));
        let table = run.tables.last().unwrap();
        assert!(table.locked_versions().is_empty());
        assert_eq!(table.unlocked_versions().len(), 3);
    }
}
