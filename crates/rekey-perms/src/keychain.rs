//! Keychains: the set of key versions a holder can currently use.
//!
//! A keychain is derived from a credential. Every version whose credential
//! seal opens is a root; from there, keychain links are followed breadth
//! first. Recovery links are only followed when deriving for an unlock.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rekey_core::{KeyVersion, Login};

use crate::credential::Credential;
use crate::crypto::EncryptionKey;
use crate::error::{PermsError, Result};
use crate::keys::{KeyHistory, LinkKind, SecretKeys};
use crate::state::LockTable;
use crate::wrapping::Wrapping;

/// Which links a derivation may follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// Chain and unlock links. Defines what is currently unlocked.
    Active,
    /// Also recovery links. Defines what an unlock can reach.
    WithRecovery,
}

impl Derivation {
    fn follows(self, kind: LinkKind) -> bool {
        match kind {
            LinkKind::Chain | LinkKind::Unlock => true,
            LinkKind::Recovery => self == Derivation::WithRecovery,
        }
    }
}

/// Secret keys of one login, by version.
#[derive(Debug, Clone)]
pub struct Keychain {
    login: Login,
    keys: BTreeMap<KeyVersion, SecretKeys>,
}

impl Keychain {
    /// An empty keychain.
    pub fn new(login: Login) -> Self {
        Self {
            login,
            keys: BTreeMap::new(),
        }
    }

    /// Derive everything `credential` reaches in `history`.
    pub fn derive(
        login: &Login,
        history: &KeyHistory,
        credential: &Credential,
        mode: Derivation,
    ) -> Result<Self> {
        let mut chain = Self::new(login.clone());

        for record in &history.records {
            let Ok(secrets) = record.credential_seal.open(credential) else {
                continue;
            };
            if !secrets.matches(&record.public_key) {
                return Err(PermsError::KeyMismatch {
                    login: login.clone(),
                    version: record.version(),
                });
            }
            chain.keys.insert(record.version(), secrets);
        }

        chain.follow_links(history, mode)?;
        Ok(chain)
    }

    /// Rebuild another identity's keychain from its delegation seals.
    ///
    /// Only versions unlocked in `locks` are included.
    pub fn from_delegation(
        login: &Login,
        history: &KeyHistory,
        delegation_key: &EncryptionKey,
        locks: &LockTable,
    ) -> Result<Self> {
        let mut chain = Self::new(login.clone());

        for seal in &history.delegation_seals {
            if !locks.is_unlocked(seal.version) {
                continue;
            }
            let record = history
                .record(seal.version)
                .ok_or_else(|| PermsError::UnknownVersion {
                    login: login.clone(),
                    version: seal.version,
                })?;
            let secrets = seal.open(delegation_key)?;
            if !secrets.matches(&record.public_key) {
                return Err(PermsError::KeyMismatch {
                    login: login.clone(),
                    version: seal.version,
                });
            }
            chain.keys.insert(seal.version, secrets);
        }

        Ok(chain)
    }

    /// Follow links from every version already held.
    pub fn follow_links(&mut self, history: &KeyHistory, mode: Derivation) -> Result<()> {
        let mut queue: VecDeque<KeyVersion> = self.keys.keys().copied().collect();

        while let Some(holder) = queue.pop_front() {
            let Some(holder_secrets) = self.keys.get(&holder).cloned() else {
                continue;
            };

            for link in history.links_from(holder) {
                if !mode.follows(link.kind) || self.keys.contains_key(&link.target) {
                    continue;
                }
                let record =
                    history
                        .record(link.target)
                        .ok_or_else(|| PermsError::UnknownVersion {
                            login: self.login.clone(),
                            version: link.target,
                        })?;
                let secrets = link.open(&holder_secrets)?;
                if !secrets.matches(&record.public_key) {
                    return Err(PermsError::KeyMismatch {
                        login: self.login.clone(),
                        version: link.target,
                    });
                }
                self.keys.insert(link.target, secrets);
                queue.push_back(link.target);
            }
        }
        Ok(())
    }

    pub fn login(&self) -> &Login {
        &self.login
    }

    pub fn insert(&mut self, version: KeyVersion, secrets: SecretKeys) {
        self.keys.insert(version, secrets);
    }

    pub fn get(&self, version: KeyVersion) -> Option<&SecretKeys> {
        self.keys.get(&version)
    }

    pub fn contains(&self, version: KeyVersion) -> bool {
        self.keys.contains_key(&version)
    }

    /// Held versions, ascending.
    pub fn versions(&self) -> BTreeSet<KeyVersion> {
        self.keys.keys().copied().collect()
    }

    /// The highest held version.
    pub fn latest(&self) -> Option<(KeyVersion, &SecretKeys)> {
        self.keys.iter().next_back().map(|(v, s)| (*v, s))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Open the first of `wrappings` addressed to this login at a held
    /// version. Newer versions are tried first.
    pub fn open(&self, wrappings: &[Wrapping]) -> Result<EncryptionKey> {
        let mut candidates: Vec<&Wrapping> = wrappings
            .iter()
            .filter(|w| w.login == self.login && self.keys.contains_key(&w.version))
            .collect();
        candidates.sort_by(|a, b| b.version.cmp(&a.version));

        for wrapping in &candidates {
            let Some(secrets) = self.keys.get(&wrapping.version) else {
                continue;
            };
            match wrapping.unwrap(secrets.box_secret()) {
                Ok(key) => {
                    tracing::debug!(
                        login = %self.login,
                        version = wrapping.version.get(),
                        group = ?wrapping.group,
                        "unwrapped group key"
                    );
                    return Ok(key);
                }
                Err(e) => {
                    tracing::debug!(
                        login = %self.login,
                        version = wrapping.version.get(),
                        error = %e,
                        "wrapping did not open"
                    );
                }
            }
        }

        Err(PermsError::NoUsableKey {
            login: self.login.clone(),
            tried: wrappings.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialSeal;
    use crate::group::GroupId;
    use crate::keys::{DelegationSeal, KeyLink, KeyOrigin, VersionRecord};
    use rekey_core::ResourceId;

    struct Builder {
        login: Login,
        history: KeyHistory,
        secrets: Vec<SecretKeys>,
    }

    impl Builder {
        fn new() -> Self {
            Self {
                login: Login::from("alice"),
                history: KeyHistory::default(),
                secrets: Vec::new(),
            }
        }

        /// Append a version sealed under `pw`, linking from it to the previous
        /// version with `link`.
        fn push(&mut self, pw: &str, link: Option<LinkKind>) -> KeyVersion {
            let version = KeyVersion::from_index(self.secrets.len());
            let secrets = SecretKeys::generate();
            let credential = Credential::from(pw);

            if let (Some(kind), Some(prev)) = (link, self.secrets.last()) {
                let prev_version = KeyVersion::from_index(self.secrets.len() - 1);
                self.history.links.push(
                    KeyLink::create(kind, version, &secrets, prev_version, prev).unwrap(),
                );
            }

            self.history.records.push(VersionRecord {
                public_key: secrets.public_key(&self.login, version),
                origin: KeyOrigin::Overwritten,
                credential_seal: CredentialSeal::seal(&secrets, &credential).unwrap(),
                endorsement: None,
            });
            self.secrets.push(secrets);
            version
        }

        fn derive(&self, pw: &str, mode: Derivation) -> BTreeSet<KeyVersion> {
            Keychain::derive(&self.login, &self.history, &Credential::from(pw), mode)
                .unwrap()
                .versions()
        }
    }

    fn set(versions: &[u32]) -> BTreeSet<KeyVersion> {
        versions.iter().copied().map(KeyVersion).collect()
    }

    #[test]
    fn test_chain_links_keep_prior_versions() {
        let mut b = Builder::new();
        b.push("a", None);
        b.push("a", Some(LinkKind::Chain));
        b.push("a", Some(LinkKind::Chain));
        assert_eq!(b.derive("a", Derivation::Active), set(&[1, 2, 3]));
    }

    #[test]
    fn test_recovery_links_only_followed_for_unlock() {
        let mut b = Builder::new();
        b.push("a", None);
        b.push("a", Some(LinkKind::Chain));
        b.push("b", Some(LinkKind::Recovery));

        assert_eq!(b.derive("b", Derivation::Active), set(&[3]));
        assert_eq!(b.derive("b", Derivation::WithRecovery), set(&[1, 2, 3]));
        assert_eq!(b.derive("a", Derivation::Active), set(&[1, 2]));
    }

    #[test]
    fn test_unknown_credential_derives_nothing() {
        let mut b = Builder::new();
        b.push("a", None);
        assert!(b.derive("zzz", Derivation::WithRecovery).is_empty());
    }

    #[test]
    fn test_open_prefers_held_versions() {
        let mut b = Builder::new();
        b.push("a", None);
        b.push("b", None);

        let key = EncryptionKey::generate();
        let group = GroupId::Resource(ResourceId(1));
        let wrappings: Vec<Wrapping> = b
            .history
            .records
            .iter()
            .map(|r| Wrapping::create(group.clone(), &key, &r.public_key).unwrap())
            .collect();

        let only_v2 =
            Keychain::derive(&b.login, &b.history, &Credential::from("b"), Derivation::Active)
                .unwrap();
        assert_eq!(only_v2.open(&wrappings).unwrap().as_bytes(), key.as_bytes());
        assert!(matches!(
            only_v2.open(&wrappings[..1]),
            Err(PermsError::NoUsableKey { tried: 1, .. })
        ));
    }

    #[test]
    fn test_from_delegation_skips_locked_versions() {
        let mut b = Builder::new();
        b.push("a", None);
        b.push("b", None);

        let delegation_key = EncryptionKey::generate();
        for (i, secrets) in b.secrets.iter().enumerate() {
            b.history.delegation_seals.push(
                DelegationSeal::seal(KeyVersion::from_index(i), secrets, &delegation_key).unwrap(),
            );
        }

        let mut locks = LockTable::new(b.login.clone());
        let plan = locks.plan_recompute(KeyVersion(2), &set(&[2]));
        locks.apply(&plan).unwrap();

        let chain = Keychain::from_delegation(&b.login, &b.history, &delegation_key, &locks).unwrap();
        assert_eq!(chain.versions(), set(&[2]));
    }
}
