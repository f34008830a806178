//! Lock/unlock controller.
//!
//! Versions lock when a credential change (renewal with a new credential or
//! an administrator overwrite) leaves them underivable. Unlocking derives
//! from a candidate credential, recovery links included, and commits an
//! unlock link from the latest version to every locked version reached,
//! together with the lock transitions, in one authority call.

use std::collections::BTreeSet;
use std::sync::Arc;

use rekey_core::{IdentityPublicKey, KeyVersion, LockedVersion, Login};
use rekey_perms::{
    verify_history, Credential, DelegationSeal, Derivation, KeyLink, Keychain, LinkKind,
};
use rekey_store::{Authority, UnlockCommit};

use crate::config::RekeyConfig;
use crate::error::{RekeyError, Result};
use crate::rotation::{rewrap, RewrapReport};
use crate::session::{KeySnapshot, Session};
use crate::sharing::open_delegation_key;

/// Outcome of an unlock.
#[derive(Debug, Clone, Default)]
pub struct UnlockReport {
    /// Versions unlocked by this call, ascending.
    pub unlocked: Vec<IdentityPublicKey>,
    /// Versions still locked afterwards.
    pub still_locked: Vec<KeyVersion>,
    /// Re-wrap pass at the latest version, run when anything was unlocked.
    pub rewrap: RewrapReport,
}

impl<A: Authority> Session<A> {
    /// Versions of `login` not derivable from its active credential,
    /// ascending.
    pub async fn locked_versions(&self, login: &Login) -> Result<Vec<LockedVersion>> {
        let history = self.authority.history(login).await?;
        let locks = self.authority.lock_table(login).await?;

        Ok(locks
            .locked_versions()
            .into_iter()
            .filter_map(|version| history.record(version))
            .map(|record| LockedVersion {
                public_key: record.public_key.clone(),
            })
            .collect())
    }

    /// Every public key of `login`, ascending, regardless of lock state.
    pub async fn public_key_history(&self, login: &Login) -> Result<Vec<IdentityPublicKey>> {
        let history = self.authority.history(login).await?;
        verify_history(login, &history.records)?;
        Ok(history.public_keys())
    }

    /// Unlock every locked version of `login` that `credential` reaches.
    ///
    /// `login` is the session identity or one it can assume. Reaching
    /// nothing new is not an error, so repeating an unlock is a no-op.
    pub async fn unlock_versions(
        &mut self,
        login: &Login,
        credential: &Credential,
    ) -> Result<UnlockReport> {
        if login != self.current_login() {
            let assumed = self.assume(login).await?;
            let latest = self.authority.latest_public_key(login).await?.version;
            let (report, _) = unlock(
                self.authority.as_ref(),
                &self.config,
                &assumed.keychain,
                latest,
                credential,
            )
            .await?;
            return Ok(report);
        }

        self.ensure_fresh().await?;
        let (report, keychain) = unlock(
            self.authority.as_ref(),
            &self.config,
            &self.snapshot.keychain,
            self.snapshot.version,
            credential,
        )
        .await?;

        if !report.unlocked.is_empty() {
            self.snapshot = KeySnapshot {
                login: self.identity.login.clone(),
                version: self.snapshot.version,
                keychain: Arc::new(keychain),
            };
        }
        Ok(report)
    }
}

/// Unlock with `keychain` holding the latest version `expected`.
/// Returns the report and the keychain extended with unlocked versions.
async fn unlock<A: Authority + ?Sized>(
    authority: &A,
    config: &RekeyConfig,
    keychain: &Keychain,
    expected: KeyVersion,
    credential: &Credential,
) -> Result<(UnlockReport, Keychain)> {
    let login = keychain.login();
    let history = authority.history(login).await?;
    verify_history(login, &history.records)?;
    if history.latest() != Some(expected) {
        return Err(RekeyError::StaleKey {
            login: login.clone(),
        });
    }

    let holder = keychain
        .get(expected)
        .ok_or_else(|| RekeyError::InvalidCredential {
            login: login.clone(),
        })?;
    let locks = authority.lock_table(login).await?;
    let reached = Keychain::derive(login, &history, credential, Derivation::WithRecovery)?;
    let plan = locks.plan_unlock(&reached.versions());

    let mut extended = keychain.clone();
    let mut links = Vec::with_capacity(plan.len());
    for transition in &plan {
        let version = transition.version;
        let secrets = reached
            .get(version)
            .ok_or_else(|| RekeyError::InvalidCredential {
                login: login.clone(),
            })?;
        links.push(KeyLink::create(LinkKind::Unlock, expected, holder, version, secrets)?);
        extended.insert(version, secrets.clone());
    }

    let mut unlocked = Vec::with_capacity(plan.len());
    if !plan.is_empty() {
        let delegation_seals =
            missing_delegation_seals(authority, &extended, &history.delegation_seals).await?;
        authority
            .commit_unlock(
                login,
                UnlockCommit {
                    expected_latest: expected,
                    links,
                    delegation_seals,
                    transitions: plan.clone(),
                },
            )
            .await?;

        unlocked.extend(
            plan.iter()
                .filter_map(|t| history.record(t.version))
                .map(|record| record.public_key.clone()),
        );
    }

    let rewrap = if unlocked.is_empty() {
        RewrapReport::default()
    } else {
        let latest = history
            .record(expected)
            .map(|r| r.public_key.clone())
            .ok_or_else(|| RekeyError::StaleKey {
                login: login.clone(),
            })?;
        rewrap(authority, config, &extended, &latest).await?
    };

    let unlocked_versions: BTreeSet<KeyVersion> = unlocked.iter().map(|k| k.version).collect();
    let still_locked = locks
        .locked_versions()
        .into_iter()
        .filter(|v| !unlocked_versions.contains(v))
        .collect();

    tracing::info!(
        login = %login,
        unlocked = unlocked.len(),
        still_locked = ?still_locked,
        "unlock complete"
    );
    Ok((
        UnlockReport {
            unlocked,
            still_locked,
            rewrap,
        },
        extended,
    ))
}

/// Seals for every held version that has none yet. Empty when the
/// delegation key cannot be opened.
async fn missing_delegation_seals<A: Authority + ?Sized>(
    authority: &A,
    keychain: &Keychain,
    existing: &[DelegationSeal],
) -> Result<Vec<DelegationSeal>> {
    let key = match open_delegation_key(authority, keychain.login(), keychain).await {
        Ok(key) => key,
        Err(e) => {
            tracing::debug!(login = %keychain.login(), error = %e, "delegation key unavailable");
            return Ok(Vec::new());
        }
    };

    let sealed: BTreeSet<KeyVersion> = existing.iter().map(|s| s.version).collect();
    let mut seals = Vec::new();
    for version in keychain.versions().difference(&sealed) {
        if let Some(secrets) = keychain.get(*version) {
            seals.push(DelegationSeal::seal(*version, secrets, &key)?);
        }
    }
    Ok(seals)
}
