//! Version secrets, version records and keychain links.
//!
//! A [`VersionRecord`] is what the authority stores for every key version:
//! the public keys, how the version came to be, the credential seal and,
//! for self-service renewals, the endorsement by the previous version.
//!
//! A [`KeyLink`] lets a holder version re-derive another version's secrets.
//! Links are always sealed under the holder's link key.

use serde::{Deserialize, Serialize};

use rekey_core::{
    BoxPublicKey, CoreError, Ed25519Signature, IdentityPublicKey, KeyVersion, Login,
    SignKeypair, SignPublicKey,
};

use crate::credential::CredentialSeal;
use crate::crypto::{contexts, derive_key, BoxSecret, EncryptionKey};
use crate::envelope::EncryptedPayload;
use crate::error::{PermsError, Result};

/// Length of serialized secret keys (box secret || sign seed).
pub const SECRET_KEYS_LEN: usize = 64;

/// The private half of one key version.
#[derive(Clone)]
pub struct SecretKeys {
    box_secret: BoxSecret,
    sign: SignKeypair,
}

impl SecretKeys {
    /// Generate fresh random secrets.
    pub fn generate() -> Self {
        Self {
            box_secret: BoxSecret::generate(),
            sign: SignKeypair::generate(),
        }
    }

    /// The box (X25519) secret.
    pub fn box_secret(&self) -> &BoxSecret {
        &self.box_secret
    }

    /// The sign keypair.
    pub fn sign_keypair(&self) -> &SignKeypair {
        &self.sign
    }

    pub fn box_public(&self) -> BoxPublicKey {
        self.box_secret.public_key()
    }

    pub fn sign_public(&self) -> SignPublicKey {
        self.sign.public_key()
    }

    /// The public key record for these secrets at `(login, version)`.
    pub fn public_key(&self, login: &Login, version: KeyVersion) -> IdentityPublicKey {
        IdentityPublicKey {
            login: login.clone(),
            version,
            box_key: self.box_public(),
            sign: self.sign_public(),
        }
    }

    /// Whether these secrets belong to `public`.
    pub fn matches(&self, public: &IdentityPublicKey) -> bool {
        self.box_public() == public.box_key && self.sign_public() == public.sign
    }

    /// Key under which this version seals its outgoing keychain links.
    pub fn link_key(&self) -> EncryptionKey {
        derive_key(contexts::KEYCHAIN_LINK, &[&self.box_secret.to_bytes()])
    }

    pub fn to_bytes(&self) -> [u8; SECRET_KEYS_LEN] {
        let mut out = [0u8; SECRET_KEYS_LEN];
        out[..32].copy_from_slice(&self.box_secret.to_bytes());
        out[32..].copy_from_slice(&self.sign.seed());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SECRET_KEYS_LEN {
            return Err(PermsError::DecryptionError(format!(
                "invalid secret keys length: expected {}, got {}",
                SECRET_KEYS_LEN,
                bytes.len()
            )));
        }
        let mut box_bytes = [0u8; 32];
        let mut seed = [0u8; 32];
        box_bytes.copy_from_slice(&bytes[..32]);
        seed.copy_from_slice(&bytes[32..]);
        Ok(Self {
            box_secret: BoxSecret::from_bytes(box_bytes),
            sign: SignKeypair::from_seed(&seed),
        })
    }

    /// Seal these secrets under `key`.
    pub fn seal(&self, key: &EncryptionKey) -> Result<EncryptedPayload> {
        EncryptedPayload::seal(&self.to_bytes(), key)
    }

    /// Open secrets sealed with [`SecretKeys::seal`].
    pub fn open(sealed: &EncryptedPayload, key: &EncryptionKey) -> Result<Self> {
        Self::from_bytes(&sealed.open(key)?)
    }
}

impl std::fmt::Debug for SecretKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKeys({:?})", self.box_public())
    }
}

/// How a key version came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyOrigin {
    /// Version 1, created at registration.
    Registered,
    /// Self-service renewal, endorsed by the previous version.
    Renewed,
    /// Administrator reset. Carries no endorsement and no links.
    Overwritten,
}

/// The authority's record of one key version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub public_key: IdentityPublicKey,
    pub origin: KeyOrigin,
    pub credential_seal: CredentialSeal,
    /// Signature by the previous version's sign key over
    /// [`IdentityPublicKey::endorsement_message`]. Present for renewals only.
    pub endorsement: Option<Ed25519Signature>,
}

impl VersionRecord {
    pub fn version(&self) -> KeyVersion {
        self.public_key.version
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| PermsError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| PermsError::SerializationError(e.to_string()))
    }
}

/// Kind of keychain link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Written by a renewal that kept the credential.
    Chain,
    /// Written by a renewal that changed the credential. Followed only when
    /// unlocking.
    Recovery,
    /// Written when a locked version is unlocked.
    Unlock,
}

/// A holder version's sealed copy of a target version's secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLink {
    pub kind: LinkKind,
    pub holder: KeyVersion,
    pub target: KeyVersion,
    pub sealed: EncryptedPayload,
}

impl KeyLink {
    /// Seal `target_secrets` so that `holder_secrets` can open them.
    pub fn create(
        kind: LinkKind,
        holder: KeyVersion,
        holder_secrets: &SecretKeys,
        target: KeyVersion,
        target_secrets: &SecretKeys,
    ) -> Result<Self> {
        let sealed = target_secrets.seal(&holder_secrets.link_key())?;
        Ok(Self {
            kind,
            holder,
            target,
            sealed,
        })
    }

    /// Open the link with the holder's secrets.
    pub fn open(&self, holder_secrets: &SecretKeys) -> Result<SecretKeys> {
        SecretKeys::open(&self.sealed, &holder_secrets.link_key())
    }

    /// Identity of the link for idempotent storage.
    pub fn key(&self) -> (LinkKind, KeyVersion, KeyVersion) {
        (self.kind, self.holder, self.target)
    }
}

/// A version's secrets sealed under the identity's delegation key, so that
/// members of the identity sharing group can assume it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationSeal {
    pub version: KeyVersion,
    pub sealed: EncryptedPayload,
}

impl DelegationSeal {
    pub fn seal(
        version: KeyVersion,
        secrets: &SecretKeys,
        delegation_key: &EncryptionKey,
    ) -> Result<Self> {
        Ok(Self {
            version,
            sealed: secrets.seal(delegation_key)?,
        })
    }

    pub fn open(&self, delegation_key: &EncryptionKey) -> Result<SecretKeys> {
        SecretKeys::open(&self.sealed, delegation_key)
    }
}

/// Everything the authority knows about one login's key versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyHistory {
    /// Records ascending by version.
    pub records: Vec<VersionRecord>,
    pub links: Vec<KeyLink>,
    pub delegation_seals: Vec<DelegationSeal>,
}

impl KeyHistory {
    /// The latest version, if any.
    pub fn latest(&self) -> Option<KeyVersion> {
        self.records.last().map(VersionRecord::version)
    }

    pub fn record(&self, version: KeyVersion) -> Option<&VersionRecord> {
        self.records.get(version.index()).filter(|r| r.version() == version)
    }

    /// Public keys ascending by version.
    pub fn public_keys(&self) -> Vec<IdentityPublicKey> {
        self.records.iter().map(|r| r.public_key.clone()).collect()
    }

    /// Links held by `holder`.
    pub fn links_from(&self, holder: KeyVersion) -> impl Iterator<Item = &KeyLink> {
        self.links.iter().filter(move |l| l.holder == holder)
    }
}

/// Check a record sequence: contiguous versions for one login, and every
/// renewal endorsed by its predecessor's sign key.
pub fn verify_history(login: &Login, records: &[VersionRecord]) -> Result<()> {
    rekey_core::verify_contiguous(login, records.iter().map(|r| &r.public_key))?;

    for pair in records.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        match next.origin {
            KeyOrigin::Renewed => {
                let signature = next
                    .endorsement
                    .as_ref()
                    .ok_or(CoreError::MissingEndorsement(next.version()))?;
                prev.public_key
                    .sign
                    .verify(&next.public_key.endorsement_message(), signature)?;
            }
            KeyOrigin::Overwritten => {}
            KeyOrigin::Registered => {
                return Err(PermsError::UnexpectedRegistration {
                    login: login.clone(),
                    version: next.version(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;

    fn record(
        login: &Login,
        version: u32,
        secrets: &SecretKeys,
        origin: KeyOrigin,
        endorser: Option<&SecretKeys>,
    ) -> VersionRecord {
        let public_key = secrets.public_key(login, KeyVersion(version));
        let endorsement = endorser.map(|e| e.sign_keypair().sign(&public_key.endorsement_message()));
        VersionRecord {
            public_key,
            origin,
            credential_seal: CredentialSeal::seal(secrets, &Credential::from("pw")).unwrap(),
            endorsement,
        }
    }

    #[test]
    fn test_secret_keys_bytes_roundtrip() {
        let secrets = SecretKeys::generate();
        let restored = SecretKeys::from_bytes(&secrets.to_bytes()).unwrap();
        assert_eq!(secrets.box_public(), restored.box_public());
        assert_eq!(secrets.sign_public(), restored.sign_public());
        assert!(SecretKeys::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_link_opens_only_with_holder() {
        let holder = SecretKeys::generate();
        let target = SecretKeys::generate();
        let link = KeyLink::create(LinkKind::Chain, KeyVersion(2), &holder, KeyVersion(1), &target)
            .unwrap();

        let opened = link.open(&holder).unwrap();
        assert_eq!(opened.box_public(), target.box_public());
        assert!(link.open(&SecretKeys::generate()).is_err());
    }

    #[test]
    fn test_verify_history_accepts_endorsed_renewals() {
        let login = Login::from("alice");
        let v1 = SecretKeys::generate();
        let v2 = SecretKeys::generate();
        let v3 = SecretKeys::generate();
        let records = vec![
            record(&login, 1, &v1, KeyOrigin::Registered, None),
            record(&login, 2, &v2, KeyOrigin::Renewed, Some(&v1)),
            record(&login, 3, &v3, KeyOrigin::Overwritten, None),
        ];
        verify_history(&login, &records).unwrap();
    }

    #[test]
    fn test_verify_history_rejects_bad_endorsement() {
        let login = Login::from("alice");
        let v1 = SecretKeys::generate();
        let v2 = SecretKeys::generate();

        let unsigned = vec![
            record(&login, 1, &v1, KeyOrigin::Registered, None),
            record(&login, 2, &v2, KeyOrigin::Renewed, None),
        ];
        assert!(matches!(
            verify_history(&login, &unsigned),
            Err(PermsError::CoreError(CoreError::MissingEndorsement(_)))
        ));

        let forged = vec![
            record(&login, 1, &v1, KeyOrigin::Registered, None),
            record(&login, 2, &v2, KeyOrigin::Renewed, Some(&SecretKeys::generate())),
        ];
        assert!(matches!(
            verify_history(&login, &forged),
            Err(PermsError::CoreError(CoreError::InvalidSignature))
        ));
    }

    #[test]
    fn test_history_lookup() {
        let login = Login::from("alice");
        let v1 = SecretKeys::generate();
        let history = KeyHistory {
            records: vec![record(&login, 1, &v1, KeyOrigin::Registered, None)],
            ..KeyHistory::default()
        };
        assert_eq!(history.latest(), Some(KeyVersion(1)));
        assert!(history.record(KeyVersion(1)).is_some());
        assert!(history.record(KeyVersion(2)).is_none());
    }
}
