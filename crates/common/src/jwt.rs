//! Bearer token helpers shared by the token authority and its callers.
//!
//! - Size limit checked before any parsing
//! - `Authorization` header parsing
//! - Token claims (`sub`, `iat`, `exp`) with a redacted `Debug`
//! - PEM armour stripping for key files
//!
//! # Security
//!
//! Validation errors are deliberately generic. Callers log the detail and
//! answer with a single "invalid token" message.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum allowed JWT size in bytes (8KB).
///
/// Tokens here are ~200 bytes; anything larger is rejected before base64
/// decoding or signature verification.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Authentication scheme of the `Authorization` header, matched case-insensitively.
pub const BEARER_SCHEME: &str = "Bearer";

/// Errors that can occur before a token reaches signature verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    #[error("invalid token")]
    TokenTooLarge,

    #[error("invalid token")]
    MissingToken,
}

/// Claims carried by every token.
///
/// `sub` is `"<namespace>|<value>"`; see [`crate::types::Identity::subject`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - redacted in Debug output.
    pub sub: String,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,
}

impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("sub", &"[REDACTED]")
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .finish()
    }
}

/// Rejects tokens over [`MAX_JWT_SIZE_BYTES`].
///
/// # Errors
///
/// Returns [`JwtValidationError::TokenTooLarge`].
pub fn check_size(token: &str) -> Result<(), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }
    Ok(())
}

/// Extracts the token from a bearer string.
///
/// Accepts either `"Bearer <token>"` (any case, any run of whitespace after
/// the scheme) or a bare token. Surrounding whitespace is ignored, and a
/// scheme with nothing after it counts as no token.
///
/// # Errors
///
/// Returns [`JwtValidationError::MissingToken`] when nothing remains after
/// stripping the scheme.
pub fn bearer_token(value: &str) -> Result<&str, JwtValidationError> {
    let value = value.trim();
    let token = match value.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case(BEARER_SCHEME) => rest.trim(),
        None if value.eq_ignore_ascii_case(BEARER_SCHEME) => "",
        _ => value,
    };

    if token.is_empty() {
        return Err(JwtValidationError::MissingToken);
    }
    Ok(token)
}

/// Decodes the base64 body of a PEM document, ignoring armour lines.
///
/// # Errors
///
/// Returns `base64::DecodeError` if the body is not valid base64.
pub fn decode_pem(pem: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let b64: String = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("-----"))
        .collect();

    STANDARD.decode(b64)
}

/// Wraps DER bytes in PEM armour with the given label.
#[must_use]
pub fn encode_pem(label: &str, der: &[u8]) -> String {
    let b64 = STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {label}-----\n");
    let mut rest = b64.as_str();
    while !rest.is_empty() {
        let split = rest.len().min(64);
        let (line, tail) = rest.split_at(split);
        pem.push_str(line);
        pem.push('\n');
        rest = tail;
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    pem
}
