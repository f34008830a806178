//! Sharing group manager: wrapping group keys for members, extending
//! groups, and resolving "assume" through identity groups.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use rekey_core::{IdentityPublicKey, Login};
use rekey_perms::{EncryptionKey, GroupId, Keychain, SharingGroup, Wrapping};
use rekey_store::{Authority, InsertResult, Page, StoreError};

use crate::error::{RekeyError, Result};
use crate::session::Session;

/// Another identity's keychain, recovered through its delegation key.
#[derive(Debug, Clone)]
pub struct Assumed {
    pub keychain: Arc<Keychain>,
    pub delegation_key: EncryptionKey,
}

impl<A: Authority> Session<A> {
    // ─────────────────────────────────────────────────────────────────────────
    // Member Resolution
    // ─────────────────────────────────────────────────────────────────────────

    /// The key a new wrapping for `login` must target: its latest version,
    /// which must be unlocked.
    pub async fn resolve_member(&self, login: &Login) -> Result<IdentityPublicKey> {
        let unreachable = || RekeyError::MemberUnreachable {
            login: login.clone(),
        };

        let public_key = match self.authority.latest_public_key(login).await {
            Ok(key) => key,
            Err(StoreError::IdentityNotFound(_)) | Err(StoreError::VersionNotFound { .. }) => {
                return Err(unreachable())
            }
            Err(e) => return Err(e.into()),
        };

        let locks = self.authority.lock_table(login).await?;
        if !locks.is_unlocked(public_key.version) {
            return Err(unreachable());
        }
        Ok(public_key)
    }

    /// Wrap `key` for each of `members` (deduplicated) at their current key.
    pub(crate) async fn wrap_for_members(
        &self,
        group: &GroupId,
        key: &EncryptionKey,
        members: &[&Login],
    ) -> Result<Vec<Wrapping>> {
        let mut seen = HashSet::new();
        let mut wrappings = Vec::with_capacity(members.len());

        for login in members {
            if !seen.insert(*login) {
                continue;
            }
            let public_key = self.resolve_member(login).await?;
            wrappings.push(Wrapping::create(group.clone(), key, &public_key)?);
            tracing::debug!(
                group = ?group,
                member = %login,
                version = public_key.version.get(),
                "wrapped group key"
            );
        }
        Ok(wrappings)
    }

    /// Add wrappings for members of `candidates` not yet in `group`.
    ///
    /// Existing wrappings are untouched. Members are resolved before any
    /// wrapping is stored, so an unreachable member stores nothing.
    pub(crate) async fn extend_group(
        &self,
        group: &GroupId,
        key: &EncryptionKey,
        candidates: &[Login],
    ) -> Result<SharingGroup> {
        let mut current = self.authority.members(group).await?;
        let missing = current.missing(candidates);
        let wrappings = self.wrap_for_members(group, key, &missing).await?;

        for wrapping in wrappings {
            let login = wrapping.login.clone();
            if self.authority.put_wrapping(wrapping).await? == InsertResult::Inserted {
                current.members.insert(login);
            }
        }
        Ok(current)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity Sharing Group
    // ─────────────────────────────────────────────────────────────────────────

    /// Let `members` assume `login`. The session must itself be able to
    /// assume `login` (or be it).
    pub async fn extend_identity_sharing_group(
        &self,
        login: &Login,
        members: &[Login],
    ) -> Result<SharingGroup> {
        let delegation_key = self.delegation_key(login).await?;
        let group = self
            .extend_group(&GroupId::Identity(login.clone()), &delegation_key, members)
            .await?;
        tracing::info!(identity = %login, members = group.members.len(), "identity sharing group extended");
        Ok(group)
    }

    /// Members of an identity's sharing group.
    pub async fn identity_sharing_group(&self, login: &Login) -> Result<SharingGroup> {
        Ok(self
            .authority
            .members(&GroupId::Identity(login.clone()))
            .await?)
    }

    /// The delegation key of `login`, opened with the session keychain or
    /// through an assume chain.
    pub(crate) async fn delegation_key(&self, login: &Login) -> Result<EncryptionKey> {
        if login == self.current_login() {
            return open_delegation_key(
                self.authority.as_ref(),
                login,
                &self.snapshot.keychain,
            )
            .await
            .map_err(|_| self.access_denied(login));
        }
        Ok(self.assume(login).await?.delegation_key)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Assume
    // ─────────────────────────────────────────────────────────────────────────

    /// Recover `target`'s keychain by walking identity sharing groups.
    ///
    /// Breadth first from the session identity, at most
    /// `config.max_assume_depth` hops. The recovered keychain holds only
    /// versions that are unlocked and delegation-sealed.
    pub async fn assume(&self, target: &Login) -> Result<Assumed> {
        let path = self.assume_path(target).await?;

        let mut keychain = Arc::clone(&self.snapshot.keychain);
        let mut delegation_key = None;
        for hop in &path {
            let key = open_delegation_key(self.authority.as_ref(), hop, &keychain)
                .await
                .map_err(|_| self.access_denied(target))?;
            let history = self.authority.history(hop).await?;
            let locks = self.authority.lock_table(hop).await?;
            keychain = Arc::new(Keychain::from_delegation(hop, &history, &key, &locks)?);
            delegation_key = Some(key);
        }

        let delegation_key = delegation_key.ok_or_else(|| self.access_denied(target))?;
        tracing::debug!(
            login = %self.current_login(),
            target = %target,
            hops = path.len(),
            versions = keychain.len(),
            "assumed identity"
        );
        Ok(Assumed {
            keychain,
            delegation_key,
        })
    }

    /// Keychain to act as `login`: the session's own, or an assumed one.
    pub(crate) async fn keychain_for(&self, login: &Login) -> Result<Arc<Keychain>> {
        if login == self.current_login() {
            Ok(Arc::clone(&self.snapshot.keychain))
        } else {
            Ok(self.assume(login).await?.keychain)
        }
    }

    /// Identities to pass through, ending at `target`.
    async fn assume_path(&self, target: &Login) -> Result<Vec<Login>> {
        let origin = self.current_login().clone();
        if target == &origin {
            return Err(self.access_denied(target));
        }

        let mut parents: HashMap<Login, Login> = HashMap::new();
        let mut queue = VecDeque::from([(origin.clone(), 0usize)]);

        while let Some((login, depth)) = queue.pop_front() {
            if depth >= self.config.max_assume_depth {
                continue;
            }
            for group in self.identity_groups_of(&login).await? {
                if group == origin || parents.contains_key(&group) {
                    continue;
                }
                parents.insert(group.clone(), login.clone());

                if &group == target {
                    let mut path = vec![group];
                    let mut cursor = target.clone();
                    while let Some(parent) = parents.get(&cursor) {
                        if parent == &origin {
                            break;
                        }
                        path.push(parent.clone());
                        cursor = parent.clone();
                    }
                    path.reverse();
                    return Ok(path);
                }
                queue.push_back((group, depth + 1));
            }
        }

        Err(self.access_denied(target))
    }

    /// Identities whose sharing group `login` belongs to, except its own.
    async fn identity_groups_of(&self, login: &Login) -> Result<Vec<Login>> {
        let page_size = self.config.rewrap_page_size;
        let mut out = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .authority
                .groups_of(login, Page::new(offset, Some(page_size)))
                .await?;
            let fetched = page.len();
            out.extend(
                page.into_iter()
                    .filter_map(|g| g.as_identity().cloned())
                    .filter(|owner| owner != login),
            );
            if fetched < page_size {
                return Ok(out);
            }
            offset += fetched;
        }
    }

    fn access_denied(&self, target: &Login) -> RekeyError {
        RekeyError::AccessDenied {
            login: self.current_login().clone(),
            target: target.clone(),
        }
    }
}

/// Open `login`'s delegation key with a keychain belonging to a member.
pub(crate) async fn open_delegation_key<A: Authority + ?Sized>(
    authority: &A,
    login: &Login,
    keychain: &Keychain,
) -> Result<EncryptionKey> {
    let wrappings = authority
        .wrappings_for(&GroupId::Identity(login.clone()), keychain.login())
        .await?;
    Ok(keychain.open(&wrappings)?)
}
