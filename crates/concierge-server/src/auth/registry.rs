//! Namespace registry and the service/delegated trust chain.
//!
//! Built once at startup with `&mut self` registration, then shared behind an
//! `Arc` and only read. Lookups need no locking.

use crate::auth::token::{
    CallIdentity, TokenAuthority, DEFAULT_TOKEN_LIFETIME, REFRESH_THRESHOLD,
    SERVICE_ACCOUNT_TOKEN_LIFETIME,
};
use crate::errors::{AuthError, ProviderError, RegistrationError};
use crate::observability::metrics::{
    record_login, record_token_issued, DELEGATED_CLASS, SERVICE_CLASS,
};
use async_trait::async_trait;
use chrono::TimeDelta;
use common::secret::SecretString;
use common::types::Identity;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Validates credentials for the identities of one namespace.
///
/// `Ok(false)` is a wrong credential or unknown principal; `Err` is a backend
/// failure. Implementations may block on network I/O.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(
        &self,
        identity: &Identity,
        credential: &SecretString,
    ) -> Result<bool, ProviderError>;
}

struct NamespaceRegistration {
    name: String,
    provider: Arc<dyn AuthProvider>,
    is_service_account: bool,
}

/// Maps namespaces to credential validators and mints tokens on login.
pub struct AuthProviderRegistry {
    authority: Arc<TokenAuthority>,
    namespaces: HashMap<String, NamespaceRegistration>,
}

impl fmt::Debug for AuthProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut namespaces: Vec<_> = self
            .namespaces
            .iter()
            .map(|(ns, reg)| (ns.as_str(), reg.name.as_str(), reg.is_service_account))
            .collect();
        namespaces.sort_unstable();
        f.debug_struct("AuthProviderRegistry")
            .field("authority", &self.authority)
            .field("namespaces", &namespaces)
            .finish()
    }
}

impl AuthProviderRegistry {
    #[must_use]
    pub fn new(authority: Arc<TokenAuthority>) -> Self {
        Self {
            authority,
            namespaces: HashMap::new(),
        }
    }

    #[must_use]
    pub fn authority(&self) -> &Arc<TokenAuthority> {
        &self.authority
    }

    /// Register the provider for `namespace`.
    ///
    /// `is_service_account` marks the namespace as a trust anchor: its
    /// principals may log in without a prior session and get 72h tokens.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateNamespace`] if the namespace
    /// already has a provider, or [`RegistrationError::EmptyName`].
    pub fn register_auth_provider(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        provider: Arc<dyn AuthProvider>,
        is_service_account: bool,
    ) -> Result<(), RegistrationError> {
        let namespace = namespace.into();
        let name = name.into();
        if namespace.is_empty() || name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if self.namespaces.contains_key(&namespace) {
            return Err(RegistrationError::DuplicateNamespace(namespace));
        }

        tracing::info!(
            target: "concierge.auth",
            namespace = %namespace,
            provider = %name,
            is_service_account,
            "Registered auth provider"
        );
        self.namespaces.insert(
            namespace,
            NamespaceRegistration {
                name,
                provider,
                is_service_account,
            },
        );
        Ok(())
    }

    /// Whether `namespace` is registered as a service-account namespace.
    #[must_use]
    pub fn is_service_namespace(&self, namespace: &str) -> bool {
        self.namespaces
            .get(namespace)
            .is_some_and(|reg| reg.is_service_account)
    }

    /// Token lifetime for an identity's namespace class.
    #[must_use]
    pub fn lifetime_for(&self, identity: &Identity) -> TimeDelta {
        if self.is_service_namespace(identity.namespace()) {
            SERVICE_ACCOUNT_TOKEN_LIFETIME
        } else {
            DEFAULT_TOKEN_LIFETIME
        }
    }

    fn class_of(&self, identity: &Identity) -> &'static str {
        if self.is_service_namespace(identity.namespace()) {
            SERVICE_CLASS
        } else {
            DELEGATED_CLASS
        }
    }

    /// Authenticate `identity` and mint a token for it.
    ///
    /// Delegated namespaces require `caller` to be a service-account session.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`]; every variant except signing failures maps
    /// to `Unauthenticated`.
    #[instrument(
        skip_all,
        name = "concierge.auth.login",
        fields(namespace = %identity.namespace(), value = %identity.value())
    )]
    pub async fn login(
        &self,
        caller: Option<&CallIdentity>,
        identity: &Identity,
        credential: &SecretString,
    ) -> Result<String, AuthError> {
        let class = self.class_of(identity);
        let result = self.try_login(caller, identity, credential).await;
        match &result {
            Ok(_) => {
                record_login(class, "success");
                record_token_issued(class, "login");
                tracing::info!(target: "concierge.auth", "Login succeeded");
            }
            Err(e) => {
                record_login(class, "error");
                tracing::warn!(target: "concierge.auth", error = %e, "Login failed");
            }
        }
        result
    }

    async fn try_login(
        &self,
        caller: Option<&CallIdentity>,
        identity: &Identity,
        credential: &SecretString,
    ) -> Result<String, AuthError> {
        let registration = self
            .namespaces
            .get(identity.namespace())
            .ok_or_else(|| AuthError::UnknownNamespace(identity.namespace().to_string()))?;

        if !registration.is_service_account {
            let anchored = caller
                .is_some_and(|c| self.is_service_namespace(c.identity().namespace()));
            if !anchored {
                return Err(AuthError::ServiceAccountRequired(
                    identity.namespace().to_string(),
                ));
            }
        }

        if !registration.provider.authenticate(identity, credential).await? {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(self
            .authority
            .generate_token(identity, self.lifetime_for(identity))?)
    }

    /// Return the caller's token, or a fresh one once it is close to expiry.
    ///
    /// While more than [`REFRESH_THRESHOLD`] remains the existing token is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingIdentity`] without a caller, or a token
    /// error if signing fails.
    #[instrument(skip_all, name = "concierge.auth.refresh")]
    pub fn refresh(&self, caller: Option<&CallIdentity>) -> Result<String, AuthError> {
        let caller = caller.ok_or(AuthError::MissingIdentity)?;
        let identity = caller.identity();

        if caller.remaining(self.authority.now()) > REFRESH_THRESHOLD {
            tracing::debug!(
                target: "concierge.auth",
                namespace = %identity.namespace(),
                value = %identity.value(),
                "Refresh within threshold; returning existing token"
            );
            return Ok(caller.token().to_string());
        }

        let token = self
            .authority
            .generate_token(identity, self.lifetime_for(identity))?;
        record_token_issued(self.class_of(identity), "refresh");
        tracing::info!(
            target: "concierge.auth",
            namespace = %identity.namespace(),
            value = %identity.value(),
            "Issued refreshed token"
        );
        Ok(token)
    }
}
