//! Key rotation engine.
//!
//! A rotation appends a new key version through the authority's
//! reserve/commit protocol, then re-wraps every group key the identity can
//! still open so the new version is usable on its own.

use std::sync::Arc;

use rekey_core::{IdentityPublicKey, KeyVersion, Login};
use rekey_perms::{
    Credential, CredentialSeal, DelegationSeal, Derivation, GroupId, KeyHistory, KeyLink,
    KeyOrigin, Keychain, LinkKind, LockTable, LockTransition, SecretKeys, VersionRecord, Wrapping,
};
use rekey_store::{
    Authority, Expectation, InsertResult, Page, Reservation, StoreError, VersionCommit,
};

use crate::config::RekeyConfig;
use crate::error::{RekeyError, Result};
use crate::session::{KeySnapshot, Session};
use crate::sharing::open_delegation_key;

/// Outcome of a re-wrap pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewrapReport {
    /// Groups that received a wrapping at the new version.
    pub rewrapped: usize,
    /// Groups that already had one.
    pub skipped: usize,
    /// Groups whose key could not be opened with any held version.
    pub failed: Vec<GroupId>,
}

impl RewrapReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of a key renewal.
#[derive(Debug, Clone)]
pub struct RenewReport {
    pub public_key: IdentityPublicKey,
    /// Whether the new version links back with a chain link (same
    /// credential) rather than a recovery link.
    pub same_credential: bool,
    pub rewrap: RewrapReport,
}

impl RenewReport {
    pub fn version(&self) -> KeyVersion {
        self.public_key.version
    }
}

/// A committed rotation.
pub(crate) struct Rotated {
    pub public_key: IdentityPublicKey,
    /// What the new credential derives.
    pub keychain: Keychain,
    /// The rotating keychain plus the new version, for re-wrapping.
    pub rewrap_keychain: Keychain,
    pub same_credential: bool,
}

impl<A: Authority> Session<A> {
    // ─────────────────────────────────────────────────────────────────────────
    // Renewal
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a new key version for the session identity.
    ///
    /// With `None` the session credential is kept. Fails with `StaleKey` if
    /// the snapshot was superseded elsewhere.
    pub async fn renew_keys(&mut self, credential: Option<Credential>) -> Result<RenewReport> {
        let credential = credential.unwrap_or_else(|| self.credential.clone());

        let rotated = rotate(
            self.authority.as_ref(),
            &self.config,
            &self.snapshot.keychain,
            self.snapshot.version,
            &credential,
        )
        .await?;

        self.credential = credential;
        self.snapshot = KeySnapshot {
            login: self.identity.login.clone(),
            version: rotated.public_key.version,
            keychain: Arc::new(rotated.keychain),
        };

        let rewrap = rewrap(
            self.authority.as_ref(),
            &self.config,
            &rotated.rewrap_keychain,
            &rotated.public_key,
        )
        .await?;

        tracing::info!(
            login = %self.identity.login,
            version = rotated.public_key.version.get(),
            same_credential = rotated.same_credential,
            rewrapped = rewrap.rewrapped,
            failed = rewrap.failed.len(),
            "keys renewed"
        );
        Ok(RenewReport {
            public_key: rotated.public_key,
            same_credential: rotated.same_credential,
            rewrap,
        })
    }

    /// Renew the keys of `login`, which is either the session identity or
    /// one it can assume.
    pub async fn renew_identity_keys(
        &mut self,
        login: &Login,
        credential: Credential,
    ) -> Result<RenewReport> {
        if login == self.current_login() {
            return self.renew_keys(Some(credential)).await;
        }

        let assumed = self.assume(login).await?;
        let latest = self.authority.latest_public_key(login).await?.version;
        if !assumed.keychain.contains(latest) {
            return Err(RekeyError::AccessDenied {
                login: self.current_login().clone(),
                target: login.clone(),
            });
        }

        let rotated = rotate(
            self.authority.as_ref(),
            &self.config,
            &assumed.keychain,
            latest,
            &credential,
        )
        .await?;
        let rewrap = rewrap(
            self.authority.as_ref(),
            &self.config,
            &rotated.rewrap_keychain,
            &rotated.public_key,
        )
        .await?;

        tracing::info!(
            login = %login,
            by = %self.current_login(),
            version = rotated.public_key.version.get(),
            "assumed identity keys renewed"
        );
        Ok(RenewReport {
            public_key: rotated.public_key,
            same_credential: rotated.same_credential,
            rewrap,
        })
    }

    /// Re-run the re-wrap pass for the snapshot's latest version.
    ///
    /// Idempotent: groups already wrapped at that version are skipped.
    pub async fn rewrap_keys(&self) -> Result<RewrapReport> {
        let public_key = self.public_key()?;
        rewrap(
            self.authority.as_ref(),
            &self.config,
            &self.snapshot.keychain,
            &public_key,
        )
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rotation
// ─────────────────────────────────────────────────────────────────────────────

/// Append a renewed version on top of `expected`, endorsed by it.
pub(crate) async fn rotate<A: Authority + ?Sized>(
    authority: &A,
    config: &RekeyConfig,
    keychain: &Keychain,
    expected: KeyVersion,
    credential: &Credential,
) -> Result<Rotated> {
    let login = keychain.login();
    let reservation =
        reserve_with_retry(authority, config, login, Expectation::Snapshot(expected)).await?;

    let (commit, secrets, derived, same_credential) =
        match prepare_renewal(authority, &reservation, keychain, credential).await {
            Ok(prepared) => prepared,
            Err(e) => {
                release(authority, reservation).await;
                return Err(e);
            }
        };

    let public_key = commit.record.public_key.clone();
    authority.commit_version(reservation, commit).await?;

    let mut rewrap_keychain = keychain.clone();
    rewrap_keychain.insert(public_key.version, secrets);

    Ok(Rotated {
        public_key,
        keychain: derived,
        rewrap_keychain,
        same_credential,
    })
}

async fn prepare_renewal<A: Authority + ?Sized>(
    authority: &A,
    reservation: &Reservation,
    keychain: &Keychain,
    credential: &Credential,
) -> Result<(VersionCommit, SecretKeys, Keychain, bool)> {
    let login = &reservation.login;
    let version = reservation.version;
    let previous = reservation.previous;

    let history = authority.history(login).await?;
    let locks = authority.lock_table(login).await?;

    let previous_secrets = keychain
        .get(previous)
        .ok_or_else(|| RekeyError::InvalidCredential {
            login: login.clone(),
        })?;
    let previous_record = history
        .record(previous)
        .ok_or_else(|| StoreError::VersionNotFound {
            login: login.clone(),
            version: previous,
        })?;
    let same_credential = previous_record.credential_seal.open(credential).is_ok();

    let secrets = SecretKeys::generate();
    let public_key = secrets.public_key(login, version);
    let endorsement = previous_secrets
        .sign_keypair()
        .sign(&public_key.endorsement_message());

    let kind = if same_credential {
        LinkKind::Chain
    } else {
        LinkKind::Recovery
    };
    let link = KeyLink::create(kind, version, &secrets, previous, previous_secrets)?;

    let delegation_seal = match open_delegation_key(authority, login, keychain).await {
        Ok(key) => Some(DelegationSeal::seal(version, &secrets, &key)?),
        Err(e) => {
            tracing::debug!(login = %login, error = %e, "delegation key unavailable, version not delegated");
            None
        }
    };

    let record = VersionRecord {
        credential_seal: CredentialSeal::seal(&secrets, credential)?,
        public_key,
        origin: KeyOrigin::Renewed,
        endorsement: Some(endorsement),
    };

    let links = vec![link];
    let (transitions, keychain) =
        plan_append(login, &history, &locks, &record, &links, credential)?;

    Ok((
        VersionCommit {
            record,
            links,
            delegation_seal,
            transitions,
        },
        secrets,
        keychain,
        same_credential,
    ))
}

/// Lock transitions for appending `record` (holding `links`): exactly what
/// `credential` reaches afterwards stays unlocked. Also returns that
/// keychain.
pub(crate) fn plan_append(
    login: &Login,
    history: &KeyHistory,
    locks: &LockTable,
    record: &VersionRecord,
    links: &[KeyLink],
    credential: &Credential,
) -> Result<(Vec<LockTransition>, Keychain)> {
    let mut next = history.clone();
    next.records.push(record.clone());
    next.links.extend(links.iter().cloned());

    let keychain = Keychain::derive(login, &next, credential, Derivation::Active)?;
    let transitions = locks.plan_recompute(record.version(), &keychain.versions());
    Ok((transitions, keychain))
}

/// Abandon a reservation after a failed prepare.
pub(crate) async fn release<A: Authority + ?Sized>(authority: &A, reservation: Reservation) {
    let login = reservation.login.clone();
    if let Err(e) = authority.release_version(reservation).await {
        tracing::warn!(login = %login, error = %e, "failed to release reservation");
    }
}

/// Reserve the next version, retrying a `VersionConflict` up to
/// `config.conflict_retries` times, `config.conflict_backoff` apart.
///
/// The authority hands an expired reservation to the next caller, so a
/// retry after the backoff recovers from an abandoned append. A snapshot
/// reservation is retried only while the latest version is still the
/// expected one.
pub(crate) async fn reserve_with_retry<A: Authority + ?Sized>(
    authority: &A,
    config: &RekeyConfig,
    login: &Login,
    expectation: Expectation,
) -> Result<Reservation> {
    let mut attempt = 0;
    loop {
        match authority.reserve_version(login, expectation).await {
            Ok(reservation) => return Ok(reservation),
            Err(StoreError::VersionConflict { .. }) if attempt < config.conflict_retries => {
                attempt += 1;
                tracing::warn!(login = %login, attempt, "version conflict, retrying reservation");
                tokio::time::sleep(config.conflict_backoff).await;

                if let Expectation::Snapshot(expected) = expectation {
                    let latest = authority.latest_public_key(login).await?.version;
                    if latest != expected {
                        return Err(RekeyError::StaleKey {
                            login: login.clone(),
                        });
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Re-wrap
// ─────────────────────────────────────────────────────────────────────────────

/// Wrap every group key `keychain` can open for `target`, page by page.
///
/// Per-group failures are reported, not raised.
pub(crate) async fn rewrap<A: Authority + ?Sized>(
    authority: &A,
    config: &RekeyConfig,
    keychain: &Keychain,
    target: &IdentityPublicKey,
) -> Result<RewrapReport> {
    let login = keychain.login();
    let page_size = config.rewrap_page_size;
    let mut report = RewrapReport::default();
    let mut offset = 0;

    loop {
        let groups = authority
            .groups_of(login, Page::new(offset, Some(page_size)))
            .await?;
        let fetched = groups.len();

        for group in groups {
            match rewrap_group(authority, keychain, &group, target).await {
                Ok(InsertResult::Inserted) => report.rewrapped += 1,
                Ok(InsertResult::AlreadyExists) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(
                        login = %login,
                        group = ?group,
                        version = target.version.get(),
                        error = %e,
                        "re-wrap failed"
                    );
                    report.failed.push(group);
                }
            }
        }

        if fetched < page_size {
            return Ok(report);
        }
        offset += fetched;
    }
}

async fn rewrap_group<A: Authority + ?Sized>(
    authority: &A,
    keychain: &Keychain,
    group: &GroupId,
    target: &IdentityPublicKey,
) -> Result<InsertResult> {
    let wrappings = authority.wrappings_for(group, &target.login).await?;
    if wrappings.iter().any(|w| w.version == target.version) {
        return Ok(InsertResult::AlreadyExists);
    }

    let key = keychain
        .open(&wrappings)
        .map_err(|_| RekeyError::ApplicationInvalidToken)?;
    let wrapping = Wrapping::create(group.clone(), &key, target)?;
    Ok(authority.put_wrapping(wrapping).await?)
}
