//! Identity operations available to a session.

use rekey_core::{Identity, IdentityPublicKey, Login};
use rekey_perms::Credential;
use rekey_store::Authority;

use crate::error::Result;
use crate::session::{new_registration, Session};

impl<A: Authority> Session<A> {
    /// Register a new identity (a device, say) from this session.
    ///
    /// The new identity's sharing group is itself, the session identity and
    /// `sharing_group`, so each of them can assume it.
    pub async fn create_identity(
        &self,
        identity: Identity,
        credential: &Credential,
        sharing_group: &[Login],
    ) -> Result<IdentityPublicKey> {
        let login = identity.login.clone();

        let mut delegates = Vec::with_capacity(sharing_group.len() + 1);
        let members = std::iter::once(self.current_login()).chain(sharing_group);
        for member in members {
            if member == &login || delegates.iter().any(|k: &IdentityPublicKey| &k.login == member) {
                continue;
            }
            delegates.push(self.resolve_member(member).await?);
        }

        let (registration, _) = new_registration(identity, credential, &delegates)?;
        let public_key = registration.record.public_key.clone();
        self.authority.register(registration).await?;

        tracing::info!(
            login = %login,
            created_by = %self.current_login(),
            delegates = delegates.len(),
            "identity created"
        );
        Ok(public_key)
    }

    /// Look up an identity.
    pub async fn get_identity(&self, login: &Login) -> Result<Identity> {
        Ok(self.authority.get_identity(login).await?)
    }
}
