//! Sessions: a logged-in identity bound to a key snapshot.
//!
//! The snapshot is an immutable value. Rotations and unlocks performed
//! through the session replace it; rotations performed elsewhere make it
//! stale, and the session must [`refresh`](Session::refresh) before
//! mutating again.

use std::sync::Arc;

use rekey_core::{Identity, IdentityPublicKey, KeyVersion, Login};
use rekey_perms::{
    verify_history, Credential, CredentialSeal, DelegationSeal, Derivation, EncryptionKey,
    GroupId, KeyOrigin, Keychain, SecretKeys, VersionRecord, Wrapping,
};
use rekey_store::{Authority, Registration};

use crate::config::RekeyConfig;
use crate::error::{RekeyError, Result};

/// The key versions a session can currently use.
#[derive(Debug, Clone)]
pub struct KeySnapshot {
    pub login: Login,
    /// Latest version when the snapshot was taken.
    pub version: KeyVersion,
    pub keychain: Arc<Keychain>,
}

/// A logged-in identity.
pub struct Session<A: Authority> {
    pub(crate) authority: Arc<A>,
    pub(crate) config: RekeyConfig,
    pub(crate) identity: Identity,
    pub(crate) credential: Credential,
    pub(crate) snapshot: KeySnapshot,
}

impl<A: Authority> Session<A> {
    // ─────────────────────────────────────────────────────────────────────────
    // Registration and Login
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a new identity and open a session for it.
    ///
    /// The identity's sharing group starts as `{login}`.
    pub async fn register(
        authority: Arc<A>,
        identity: Identity,
        credential: Credential,
        config: RekeyConfig,
    ) -> Result<Self> {
        let (registration, secrets) = new_registration(identity.clone(), &credential, &[])?;
        authority.register(registration).await?;

        let mut keychain = Keychain::new(identity.login.clone());
        keychain.insert(KeyVersion::FIRST, secrets);

        Ok(Self {
            authority,
            config,
            snapshot: KeySnapshot {
                login: identity.login.clone(),
                version: KeyVersion::FIRST,
                keychain: Arc::new(keychain),
            },
            identity,
            credential,
        })
    }

    /// Open a session for an existing identity.
    ///
    /// Fails with `InvalidCredential` unless `credential` reaches the latest
    /// key version.
    pub async fn login(
        authority: Arc<A>,
        login: &Login,
        credential: Credential,
        config: RekeyConfig,
    ) -> Result<Self> {
        let (identity, snapshot) = open_snapshot(authority.as_ref(), login, &credential).await?;
        tracing::debug!(login = %login, version = snapshot.version.get(), "session opened");

        Ok(Self {
            authority,
            config,
            identity,
            credential,
            snapshot,
        })
    }

    /// Refetch history and rebuild the snapshot with the session credential.
    pub async fn refresh(&mut self) -> Result<()> {
        let (identity, snapshot) =
            open_snapshot(self.authority.as_ref(), &self.identity.login, &self.credential).await?;
        self.identity = identity;
        self.snapshot = snapshot;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn current_login(&self) -> &Login {
        &self.identity.login
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn snapshot(&self) -> &KeySnapshot {
        &self.snapshot
    }

    pub fn config(&self) -> &RekeyConfig {
        &self.config
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    /// Public key of the snapshot's latest version.
    pub fn public_key(&self) -> Result<IdentityPublicKey> {
        let secrets = self.current_secrets()?;
        Ok(secrets.public_key(&self.identity.login, self.snapshot.version))
    }

    pub(crate) fn current_secrets(&self) -> Result<&SecretKeys> {
        self.snapshot
            .keychain
            .get(self.snapshot.version)
            .ok_or_else(|| RekeyError::InvalidCredential {
                login: self.identity.login.clone(),
            })
    }

    /// Fail with `StaleKey` if the authority has moved past the snapshot.
    pub(crate) async fn ensure_fresh(&self) -> Result<()> {
        let latest = self
            .authority
            .latest_public_key(&self.identity.login)
            .await?
            .version;
        if latest != self.snapshot.version {
            return Err(RekeyError::StaleKey {
                login: self.identity.login.clone(),
            });
        }
        Ok(())
    }
}

async fn open_snapshot<A: Authority + ?Sized>(
    authority: &A,
    login: &Login,
    credential: &Credential,
) -> Result<(Identity, KeySnapshot)> {
    let identity = authority.get_identity(login).await?;
    let history = authority.history(login).await?;
    verify_history(login, &history.records)?;

    let keychain = Keychain::derive(login, &history, credential, Derivation::Active)?;
    let version = history
        .latest()
        .filter(|latest| keychain.contains(*latest))
        .ok_or_else(|| RekeyError::InvalidCredential {
            login: login.clone(),
        })?;

    Ok((
        identity,
        KeySnapshot {
            login: login.clone(),
            version,
            keychain: Arc::new(keychain),
        },
    ))
}

/// Build the registration of a new identity at version 1, with its
/// delegation key wrapped for itself and for `delegates`.
pub(crate) fn new_registration(
    identity: Identity,
    credential: &Credential,
    delegates: &[IdentityPublicKey],
) -> Result<(Registration, SecretKeys)> {
    let login = identity.login.clone();
    let secrets = SecretKeys::generate();
    let public_key = secrets.public_key(&login, KeyVersion::FIRST);

    let delegation_key = EncryptionKey::generate();
    let group = GroupId::Identity(login);

    let mut wrappings = vec![Wrapping::create(group.clone(), &delegation_key, &public_key)?];
    for delegate in delegates {
        wrappings.push(Wrapping::create(group.clone(), &delegation_key, delegate)?);
    }

    let registration = Registration {
        identity,
        record: VersionRecord {
            credential_seal: CredentialSeal::seal(&secrets, credential)?,
            public_key,
            origin: KeyOrigin::Registered,
            endorsement: None,
        },
        delegation_seal: Some(DelegationSeal::seal(
            KeyVersion::FIRST,
            &secrets,
            &delegation_key,
        )?),
        wrappings,
    };
    Ok((registration, secrets))
}
