//! Administrator sessions.
//!
//! An overwrite appends a version without proof of the prior credential:
//! no endorsement, no links. Whatever the new credential cannot reach
//! becomes locked, and nothing is re-wrapped.

use std::sync::Arc;

use rekey_core::{IdentityPublicKey, Login};
use rekey_perms::{Credential, CredentialSeal, KeyOrigin, SecretKeys, VersionRecord, VersionState};
use rekey_store::{AdminToken, Authority, Expectation, Reservation, VersionCommit};

use crate::config::RekeyConfig;
use crate::error::Result;
use crate::rotation::{plan_append, release, reserve_with_retry};

/// A session authorized by an administrator token.
pub struct AdminSession<A: Authority> {
    authority: Arc<A>,
    token: AdminToken,
    config: RekeyConfig,
}

impl<A: Authority> AdminSession<A> {
    /// Open an administrator session. The token is checked by the
    /// authority on every privileged call.
    pub fn login(authority: Arc<A>, token: AdminToken, config: RekeyConfig) -> Self {
        Self {
            authority,
            token,
            config,
        }
    }

    /// Append a version for `login` protected by `credential`.
    pub async fn overwrite_keys(
        &self,
        login: &Login,
        credential: &Credential,
    ) -> Result<IdentityPublicKey> {
        let authority = self.authority.as_ref();
        let reservation =
            reserve_with_retry(authority, &self.config, login, Expectation::Admin(self.token))
                .await?;

        let commit = match self.prepare(&reservation, credential).await {
            Ok(commit) => commit,
            Err(e) => {
                release(authority, reservation).await;
                return Err(e);
            }
        };

        let public_key = commit.record.public_key.clone();
        let locked = commit
            .transitions
            .iter()
            .filter(|t| t.to == VersionState::Locked)
            .count();
        authority.commit_version(reservation, commit).await?;

        tracing::info!(
            login = %login,
            version = public_key.version.get(),
            newly_locked = locked,
            "keys overwritten"
        );
        Ok(public_key)
    }

    async fn prepare(
        &self,
        reservation: &Reservation,
        credential: &Credential,
    ) -> Result<VersionCommit> {
        let login = &reservation.login;
        let history = self.authority.history(login).await?;
        let locks = self.authority.lock_table(login).await?;

        let secrets = SecretKeys::generate();
        let record = VersionRecord {
            credential_seal: CredentialSeal::seal(&secrets, credential)?,
            public_key: secrets.public_key(login, reservation.version),
            origin: KeyOrigin::Overwritten,
            endorsement: None,
        };
        let (transitions, _) = plan_append(login, &history, &locks, &record, &[], credential)?;

        Ok(VersionCommit {
            record,
            links: Vec::new(),
            delegation_seal: None,
            transitions,
        })
    }
}
