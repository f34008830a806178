//! Resource access layer.
//!
//! A resource payload is encrypted once under a fresh resource key; the key
//! is wrapped per member key version. Payload encoding is pluggable: raw
//! bytes, JSON, or caller-supplied serialize/parse functions.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use rekey_core::{Login, ResourceId};
use rekey_perms::{
    EncryptedPayload, EncryptedPayloadBuilder, EncryptionKey, GroupId, Keychain, SharingGroup,
    Wrapping,
};
use rekey_store::{Authority, NewResource, Page, StoredResource};

use crate::error::{RekeyError, Result};
use crate::session::Session;

/// A decrypted resource.
#[derive(Debug, Clone)]
pub struct Resource<T> {
    pub id: ResourceId,
    pub kind: String,
    pub creator: Login,
    /// Authority-assigned creation time (ms), strictly increasing.
    pub created_at: u64,
    pub payload: T,
    key: EncryptionKey,
}

impl<T> Resource<T> {
    /// The resource key.
    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    /// Encrypt additional content under the resource key.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload> {
        Ok(EncryptedPayload::seal(plaintext, &self.key)?)
    }

    /// Decrypt content encrypted with [`Resource::encrypt`].
    pub fn decrypt(&self, envelope: &EncryptedPayload) -> Result<Vec<u8>> {
        Ok(envelope.open(&self.key)?)
    }

    fn from_stored(stored: StoredResource, payload: T, key: EncryptionKey) -> Self {
        Self {
            id: stored.id,
            kind: stored.kind,
            creator: stored.creator,
            created_at: stored.created_at,
            payload,
            key,
        }
    }
}

impl<T: PartialEq> PartialEq for Resource<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.creator == other.creator
            && self.created_at == other.created_at
            && self.payload == other.payload
    }
}

/// Options for listing resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub limit: Option<usize>,
    pub offset: usize,
    /// List as another identity, resolved through identity sharing groups.
    pub assume: Option<Login>,
}

impl ListOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn assuming(mut self, login: impl Into<Login>) -> Self {
        self.assume = Some(login.into());
        self
    }
}

fn raw_bytes(plaintext: Vec<u8>) -> Result<Bytes> {
    Ok(Bytes::from(plaintext))
}

fn json<T: DeserializeOwned>(plaintext: Vec<u8>) -> Result<T> {
    serde_json::from_slice(&plaintext).map_err(RekeyError::codec)
}

impl<A: Authority> Session<A> {
    // ─────────────────────────────────────────────────────────────────────────
    // Create
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a resource with a raw byte payload. The session identity is
    /// always a member, named in `members` or not.
    pub async fn create_resource(
        &self,
        kind: &str,
        payload: Bytes,
        members: &[Login],
    ) -> Result<Resource<Bytes>> {
        self.create_resource_with(kind, payload, members, |p| Ok(p.to_vec()))
            .await
    }

    /// Create a resource with a JSON-encoded payload.
    pub async fn create_json_resource<T: Serialize>(
        &self,
        kind: &str,
        payload: T,
        members: &[Login],
    ) -> Result<Resource<T>> {
        self.create_resource_with(kind, payload, members, |p| {
            serde_json::to_vec(p).map_err(RekeyError::codec)
        })
        .await
    }

    /// Create a resource shared with `members` and the session identity.
    ///
    /// The session identity is added even when `members` omits it, so the
    /// creator can always read what it created. Each member gets a wrapping
    /// at its current unlocked version; one unreachable member fails the
    /// whole call with `MemberUnreachable`.
    pub async fn create_resource_with<T, F>(
        &self,
        kind: &str,
        payload: T,
        members: &[Login],
        serialize: F,
    ) -> Result<Resource<T>>
    where
        F: FnOnce(&T) -> Result<Vec<u8>>,
    {
        self.ensure_fresh().await?;

        let plaintext = serialize(&payload)?;
        let (envelope, key) = EncryptedPayloadBuilder::new(plaintext).build()?;

        let id = self.authority.allocate_resource_id().await?;
        let group = GroupId::Resource(id);

        let creator = self.current_login().clone();
        let recipients: Vec<&Login> = std::iter::once(&creator).chain(members).collect();
        let wrappings = self.wrap_for_members(&group, &key, &recipients).await?;

        let stored = self
            .authority
            .insert_resource(
                NewResource {
                    id,
                    kind: kind.to_string(),
                    creator: creator.clone(),
                    envelope,
                },
                wrappings,
            )
            .await?;

        tracing::debug!(id = %stored.id, kind = %stored.kind, members = recipients.len(), "resource created");
        Ok(Resource::from_stored(stored, payload, key))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // List and Get
    // ─────────────────────────────────────────────────────────────────────────

    /// Resources visible to the session (or the assumed identity), newest
    /// first.
    pub async fn list_resources(&self, options: &ListOptions) -> Result<Vec<Resource<Bytes>>> {
        self.list_resources_with(options, raw_bytes).await
    }

    /// [`list_resources`](Self::list_resources) with JSON payloads.
    pub async fn list_json_resources<T: DeserializeOwned>(
        &self,
        options: &ListOptions,
    ) -> Result<Vec<Resource<T>>> {
        self.list_resources_with(options, json::<T>).await
    }

    /// List with a custom payload parser.
    ///
    /// Fails with `ApplicationInvalidToken` if any listed resource is only
    /// wrapped under locked versions.
    pub async fn list_resources_with<T, F>(
        &self,
        options: &ListOptions,
        parse: F,
    ) -> Result<Vec<Resource<T>>>
    where
        F: Fn(Vec<u8>) -> Result<T>,
    {
        let reader = options
            .assume
            .clone()
            .unwrap_or_else(|| self.current_login().clone());
        let keychain = self.keychain_for(&reader).await?;

        let listed = self
            .authority
            .list_resources(&reader, Page::new(options.offset, options.limit))
            .await?;

        listed
            .into_iter()
            .map(|item| open_resource(&keychain, item.resource, &item.wrappings, &parse))
            .collect()
    }

    /// Get a resource the session can read.
    pub async fn get_resource(&self, id: ResourceId) -> Result<Resource<Bytes>> {
        self.get_resource_with(id, raw_bytes).await
    }

    /// [`get_resource`](Self::get_resource) with a JSON payload.
    pub async fn get_json_resource<T: DeserializeOwned>(
        &self,
        id: ResourceId,
    ) -> Result<Resource<T>> {
        self.get_resource_with(id, json::<T>).await
    }

    /// Get with a custom payload parser.
    ///
    /// `ResourceNotFound` if the resource is absent or the session holds no
    /// wrapping for it.
    pub async fn get_resource_with<T, F>(&self, id: ResourceId, parse: F) -> Result<Resource<T>>
    where
        F: Fn(Vec<u8>) -> Result<T>,
    {
        let wrappings = self
            .authority
            .wrappings_for(&GroupId::Resource(id), self.current_login())
            .await?;
        if wrappings.is_empty() {
            return Err(RekeyError::ResourceNotFound { id });
        }

        let stored = self.authority.get_resource(id).await?;
        open_resource(&self.snapshot.keychain, stored, &wrappings, &parse)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sharing
    // ─────────────────────────────────────────────────────────────────────────

    /// Share a resource with more members. Existing wrappings are kept.
    pub async fn extend_resource_sharing_group(
        &self,
        id: ResourceId,
        members: &[Login],
    ) -> Result<SharingGroup> {
        let group = GroupId::Resource(id);
        let wrappings = self
            .authority
            .wrappings_for(&group, self.current_login())
            .await?;
        if wrappings.is_empty() {
            return Err(RekeyError::ResourceNotFound { id });
        }
        let key = self
            .snapshot
            .keychain
            .open(&wrappings)
            .map_err(|_| RekeyError::ApplicationInvalidToken)?;

        let extended = self.extend_group(&group, &key, members).await?;
        tracing::info!(id = %id, members = extended.members.len(), "resource sharing group extended");
        Ok(extended)
    }

    /// Members of a resource's sharing group.
    pub async fn resource_sharing_group(&self, id: ResourceId) -> Result<SharingGroup> {
        Ok(self.authority.members(&GroupId::Resource(id)).await?)
    }
}

fn open_resource<T, F>(
    keychain: &Keychain,
    stored: StoredResource,
    wrappings: &[Wrapping],
    parse: &F,
) -> Result<Resource<T>>
where
    F: Fn(Vec<u8>) -> Result<T>,
{
    let key = keychain.open(wrappings).map_err(|e| {
        tracing::debug!(id = %stored.id, error = %e, "no unlocked version opens resource");
        RekeyError::ApplicationInvalidToken
    })?;
    let plaintext = stored.envelope.open(&key)?;
    let payload = parse(plaintext)?;
    Ok(Resource::from_stored(stored, payload, key))
}
