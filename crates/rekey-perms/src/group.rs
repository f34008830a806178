//! Sharing group identifiers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use rekey_core::{Login, ResourceId};

/// What a sharing group protects.
///
/// A resource group guards a resource key. An identity group guards that
/// identity's delegation key, which is what makes "assume" possible.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum GroupId {
    Resource(ResourceId),
    Identity(Login),
}

impl GroupId {
    /// Bytes bound into wrap key derivation.
    pub fn context_bytes(&self) -> Vec<u8> {
        match self {
            GroupId::Resource(id) => {
                let mut out = vec![b'r'];
                out.extend_from_slice(&id.to_be_bytes());
                out
            }
            GroupId::Identity(login) => {
                let mut out = vec![b'i'];
                out.extend_from_slice(login.as_bytes());
                out
            }
        }
    }

    pub fn as_identity(&self) -> Option<&Login> {
        match self {
            GroupId::Identity(login) => Some(login),
            GroupId::Resource(_) => None,
        }
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupId::Resource(id) => write!(f, "Group(resource {})", id),
            GroupId::Identity(login) => write!(f, "Group(identity {})", login),
        }
    }
}

impl From<ResourceId> for GroupId {
    fn from(id: ResourceId) -> Self {
        GroupId::Resource(id)
    }
}

/// A sharing group and its members. Append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharingGroup {
    pub id: GroupId,
    pub members: BTreeSet<Login>,
}

impl SharingGroup {
    pub fn new(id: GroupId) -> Self {
        Self {
            id,
            members: BTreeSet::new(),
        }
    }

    pub fn contains(&self, login: &Login) -> bool {
        self.members.contains(login)
    }

    /// Members of `candidates` not yet in the group, deduplicated and in
    /// order of first appearance.
    pub fn missing<'a>(&self, candidates: &'a [Login]) -> Vec<&'a Login> {
        let mut seen = BTreeSet::new();
        candidates
            .iter()
            .filter(|login| !self.members.contains(*login) && seen.insert(*login))
            .collect()
    }
}
