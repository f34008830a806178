//! Strong type definitions for Rekey.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable, unique identity handle (e.g. `alice@example.org`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Login(String);

impl Login {
    /// Create a login from any string-like value.
    pub fn new(login: impl Into<String>) -> Self {
        Self(login.into())
    }

    /// Borrow the login as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes used when binding a login into key derivation contexts.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Login({})", self.0)
    }
}

impl fmt::Display for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Login {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Login {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Login {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One generation of an identity's key pair.
///
/// Versions start at 1 and are contiguous for a given login.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyVersion(pub u32);

impl KeyVersion {
    /// The version assigned at registration.
    pub const FIRST: Self = Self(1);

    /// The version that follows this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The raw version number.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Zero-based index of this version in an ascending history.
    pub const fn index(self) -> usize {
        (self.0 as usize).saturating_sub(1)
    }

    /// Version for a zero-based history index.
    pub const fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }
}

impl fmt::Debug for KeyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for KeyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for KeyVersion {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Authority-assigned resource identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u64);

impl ResourceId {
    /// Create from a raw id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Big-endian bytes, used in wrap contexts.
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ResourceId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_version_index_roundtrip() {
        for i in 0..10 {
            assert_eq!(KeyVersion::from_index(i).index(), i);
        }
        assert_eq!(KeyVersion::FIRST.index(), 0);
        assert_eq!(KeyVersion::FIRST.next(), KeyVersion(2));
    }

    #[test]
    fn test_login_display() {
        let login = Login::from("alice@peps.test");
        assert_eq!(login.to_string(), "alice@peps.test");
        assert_eq!(format!("{:?}", login), "Login(alice@peps.test)");
    }

    #[test]
    fn test_login_serializes_as_plain_string() {
        let login = Login::from("bob");
        let json = serde_json::to_string(&login).unwrap();
        assert_eq!(json, "\"bob\"");
    }
}
