//! Built-in credential validators backed by bcrypt hashes.

use crate::auth::registry::AuthProvider;
use crate::errors::ProviderError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::Identity;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use tracing::instrument;

/// Length of generated service-account secrets.
pub const GENERATED_SECRET_LENGTH: usize = 64;

/// Verify `credential` against a bcrypt `hash` off the async runtime.
async fn verify_bcrypt(credential: &SecretString, hash: &SecretString) -> Result<bool, ProviderError> {
    let credential = credential.clone();
    let hash = hash.clone();
    tokio::task::spawn_blocking(move || {
        bcrypt::verify(credential.expose_secret(), hash.expose_secret())
    })
    .await
    .map_err(|e| ProviderError::Backend(format!("password verification task failed: {e}")))?
    .map_err(|e| ProviderError::Backend(format!("password verification failed: {e}")))
}

/// Validates every principal of a namespace against one bcrypt hash.
///
/// Used for the service-account namespace, whose single secret is supplied
/// as a hash at startup. Optionally restricted to one account value.
pub struct BcryptAuthProvider {
    hash: SecretString,
    account: Option<String>,
}

impl fmt::Debug for BcryptAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BcryptAuthProvider")
            .field("hash", &"[REDACTED]")
            .field("account", &self.account)
            .finish()
    }
}

impl BcryptAuthProvider {
    #[must_use]
    pub fn new(hash: SecretString) -> Self {
        Self {
            hash,
            account: None,
        }
    }

    /// Only accept `value` as the principal.
    #[must_use]
    pub fn for_account(mut self, value: impl Into<String>) -> Self {
        self.account = Some(value.into());
        self
    }
}

#[async_trait]
impl AuthProvider for BcryptAuthProvider {
    #[instrument(skip_all, name = "concierge.auth.bcrypt")]
    async fn authenticate(
        &self,
        identity: &Identity,
        credential: &SecretString,
    ) -> Result<bool, ProviderError> {
        if self
            .account
            .as_deref()
            .is_some_and(|account| account != identity.value())
        {
            return Ok(false);
        }
        verify_bcrypt(credential, &self.hash).await
    }
}

/// Fixed in-memory population of `value -> bcrypt hash`.
#[derive(Default)]
pub struct StaticAuthProvider {
    accounts: HashMap<String, SecretString>,
}

impl fmt::Debug for StaticAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut accounts: Vec<_> = self.accounts.keys().collect();
        accounts.sort_unstable();
        f.debug_struct("StaticAuthProvider")
            .field("accounts", &accounts)
            .finish()
    }
}

impl StaticAuthProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an account.
    #[must_use]
    pub fn with_account(mut self, value: impl Into<String>, hash: SecretString) -> Self {
        self.accounts.insert(value.into(), hash);
        self
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    #[instrument(skip_all, name = "concierge.auth.static")]
    async fn authenticate(
        &self,
        identity: &Identity,
        credential: &SecretString,
    ) -> Result<bool, ProviderError> {
        match self.accounts.get(identity.value()) {
            Some(hash) => verify_bcrypt(credential, hash).await,
            None => {
                tracing::debug!(
                    target: "concierge.auth",
                    namespace = %identity.namespace(),
                    value = %identity.value(),
                    "No account matching identity"
                );
                Ok(false)
            }
        }
    }
}

/// Generate a random service-account secret and its bcrypt hash.
///
/// The secret is shown once to the operator; only the hash is configured.
///
/// # Errors
///
/// Returns [`ProviderError::Backend`] if hashing fails.
pub fn generate_credentials() -> Result<(SecretString, String), ProviderError> {
    let secret: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SECRET_LENGTH)
        .map(char::from)
        .collect();

    let hash = bcrypt::hash(&secret, bcrypt::DEFAULT_COST)
        .map_err(|e| ProviderError::Backend(format!("password hashing failed: {e}")))?;

    Ok((SecretString::from(secret), hash))
}
