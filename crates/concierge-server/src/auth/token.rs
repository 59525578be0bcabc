//! Token authority: issues and validates signed bearer tokens.
//!
//! Tokens are EdDSA (Ed25519) JWTs with claims `{sub, iat, exp}` where `sub`
//! is `"<namespace>|<value>"`. The signing key is read-only after
//! construction, so one authority serves unbounded concurrent callers.
//!
//! # Security
//!
//! - Tokens are size-checked before parsing
//! - Only EdDSA is accepted; any other `alg` header is rejected
//! - Expiry is checked against the authority's clock with zero leeway
//! - Rejections carry detail for the operator log only; callers see
//!   [`crate::errors::INVALID_TOKEN_MESSAGE`]

use crate::auth::clock::{Clock, SystemClock};
use crate::errors::TokenError;
use crate::observability::metrics::record_token_validation;
use chrono::{DateTime, TimeDelta, Utc};
use common::jwt::{bearer_token, check_size, decode_pem, TokenClaims};
use common::secret::{ExposeSecret, SecretString};
use common::types::Identity;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

/// Lifetime of tokens for delegated-user namespaces.
pub const DEFAULT_TOKEN_LIFETIME: TimeDelta = TimeDelta::minutes(5);

/// Lifetime of tokens for service-account namespaces.
pub const SERVICE_ACCOUNT_TOKEN_LIFETIME: TimeDelta = TimeDelta::hours(72);

/// Refresh returns the caller's token unchanged while more than this remains.
pub const REFRESH_THRESHOLD: TimeDelta = TimeDelta::minutes(5);

/// Identity established for one call from a validated bearer token.
///
/// Attached to the request extensions by the auth layer and read-only from
/// then on. The raw token is kept so refresh can hand it back unchanged.
#[derive(Clone, Debug)]
pub struct CallIdentity {
    identity: Identity,
    raw_token: SecretString,
    expires_at: DateTime<Utc>,
}

impl CallIdentity {
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The bearer token this identity was parsed from.
    #[must_use]
    pub fn token(&self) -> &str {
        self.raw_token.expose_secret()
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Time left before expiry, measured from `now`.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> TimeDelta {
        self.expires_at - now
    }
}

/// Signs and validates bearer tokens with a single Ed25519 key pair.
pub struct TokenAuthority {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
    ephemeral: bool,
}

impl fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("signing_key", &"[REDACTED]")
            .field("clock", &self.clock)
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}

impl TokenAuthority {
    /// Load the signing key from a PKCS#8 file, PEM-armoured or raw DER.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::KeyRead`] if the file cannot be read and
    /// [`TokenError::InvalidKey`] if it does not hold an Ed25519 key.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn from_key_file(path: &Path) -> Result<Self, TokenError> {
        let contents = std::fs::read(path).map_err(|source| TokenError::KeyRead {
            path: path.to_path_buf(),
            source,
        })?;

        let der = if contents.starts_with(b"-----") {
            let pem = std::str::from_utf8(&contents)
                .map_err(|e| TokenError::InvalidKey(format!("PEM is not UTF-8: {e}")))?;
            decode_pem(pem).map_err(|e| TokenError::InvalidKey(format!("PEM body: {e}")))?
        } else {
            contents
        };

        let authority = Self::from_pkcs8(&der)?;
        tracing::info!(target: "concierge.auth", "Loaded token signing key");
        Ok(authority)
    }

    /// Build an authority from PKCS#8 (v1 or v2) Ed25519 key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidKey`] if the bytes are not an Ed25519 key.
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, TokenError> {
        let key_pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(pkcs8)
            .map_err(|e| TokenError::InvalidKey(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        // Expiry is checked in `parse_token` against the injected clock.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_ed_der(pkcs8),
            decoding_key: DecodingKey::from_ed_der(key_pair.public_key().as_ref()),
            validation,
            clock: Arc::new(SystemClock),
            ephemeral: false,
        })
    }

    /// Generate a key pair that lives only as long as this process.
    ///
    /// Every restart invalidates all tokens issued by the previous process.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidKey`] if key generation fails.
    pub fn ephemeral() -> Result<Self, TokenError> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|e| TokenError::InvalidKey(format!("keypair generation failed: {e}")))?;

        let mut authority = Self::from_pkcs8(pkcs8.as_ref())?;
        authority.ephemeral = true;
        Ok(authority)
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Current time according to this authority's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Sign a token for `identity` valid for `lifetime` from now.
    ///
    /// A negative lifetime yields a token that is already expired.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Signing`] if the expiry overflows or signing fails.
    #[instrument(skip_all)]
    pub fn generate_token(&self, identity: &Identity, lifetime: TimeDelta) -> Result<String, TokenError> {
        let issued_at = self.clock.now();
        let expires_at = issued_at
            .checked_add_signed(lifetime)
            .ok_or_else(|| TokenError::Signing("token lifetime out of range".to_string()))?;

        let claims = TokenClaims {
            sub: identity.subject(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());

        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(format!("JWT signing operation failed: {e}")))
    }

    /// Validate a bearer string (`"Bearer <token>"` or the bare token).
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidToken`] for an oversized, malformed,
    /// wrongly-signed or wrong-algorithm token or a malformed subject, and
    /// [`TokenError::Expired`] once `exp` is not after the clock's now.
    #[instrument(skip_all)]
    pub fn parse_token(&self, bearer: &str) -> Result<CallIdentity, TokenError> {
        let result = self.validate(bearer);
        match &result {
            Ok(_) => record_token_validation("success", None),
            Err(TokenError::Expired) => record_token_validation("error", Some("expired")),
            Err(TokenError::InvalidToken(_)) => record_token_validation("error", Some("malformed")),
            Err(_) => record_token_validation("error", Some("signature")),
        }
        result
    }

    fn validate(&self, bearer: &str) -> Result<CallIdentity, TokenError> {
        let token = bearer_token(bearer).map_err(|e| TokenError::InvalidToken(e.to_string()))?;
        check_size(token).map_err(|_| TokenError::InvalidToken("token too large".to_string()))?;

        let token_data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| TokenError::InvalidToken(format!("verification failed: {e}")))?;
        let claims = token_data.claims;

        let identity = Identity::from_subject(&claims.sub)
            .map_err(|e| TokenError::InvalidToken(e.to_string()))?;

        if claims.exp <= self.clock.now().timestamp() {
            return Err(TokenError::Expired);
        }

        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| TokenError::InvalidToken("exp out of range".to_string()))?;

        Ok(CallIdentity {
            identity,
            raw_token: SecretString::from(token.to_string()),
            expires_at,
        })
    }
}
