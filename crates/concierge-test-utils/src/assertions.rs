//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions for issued tokens. These decode the token
//! without verifying it; signature checks belong to the token authority tests.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;

/// JWT header structure
#[derive(Debug, Deserialize)]
struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

/// JWT claims structure
#[derive(Debug, Deserialize)]
struct JwtClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

fn segment(token: &str, index: usize) -> Vec<u8> {
    let part = token
        .split('.')
        .nth(index)
        .unwrap_or_else(|| panic!("JWT has no segment {index}"));
    URL_SAFE_NO_PAD
        .decode(part)
        .unwrap_or_else(|e| panic!("Failed to base64 decode JWT segment {index}: {e}"))
}

fn claims(token: &str) -> JwtClaims {
    serde_json::from_slice(&segment(token, 1)).expect("Failed to parse JWT claims")
}

/// Custom assertions for issued tokens
///
/// # Example
/// ```rust,ignore
/// token
///     .assert_valid_jwt()
///     .assert_for_subject("svc|acct-1")
///     .assert_lifetime(72 * 3600);
/// ```
pub trait TokenAssertions {
    /// Assert that the token is an EdDSA JWT with decodable claims
    fn assert_valid_jwt(&self) -> &Self;

    /// Assert that the token is for the specified subject
    fn assert_for_subject(&self, subject: &str) -> &Self;

    /// Assert that `exp - iat` equals `seconds`
    fn assert_lifetime(&self, seconds: i64) -> &Self;

    /// Assert that the token expires within `seconds` of the wall clock (5s tolerance)
    fn assert_expires_in(&self, seconds: i64) -> &Self;

    /// Expiry claim, in seconds since the epoch
    fn expiry(&self) -> i64;
}

impl TokenAssertions for String {
    fn assert_valid_jwt(&self) -> &Self {
        let parts = self.split('.').count();
        assert_eq!(
            parts, 3,
            "JWT must have 3 parts (header.payload.signature), got {parts}"
        );

        let header: JwtHeader =
            serde_json::from_slice(&segment(self, 0)).expect("Failed to parse JWT header JSON");
        assert_eq!(header.alg, "EdDSA", "Expected EdDSA algorithm");
        assert_eq!(header.typ, "JWT", "Expected JWT type");

        let claims = claims(self);
        assert!(
            claims.exp >= claims.iat,
            "Token expires ({}) before it was issued ({})",
            claims.exp,
            claims.iat
        );
        self
    }

    fn assert_for_subject(&self, subject: &str) -> &Self {
        let claims = claims(self);
        assert_eq!(
            claims.sub, subject,
            "Expected subject '{}', got '{}'",
            subject, claims.sub
        );
        self
    }

    fn assert_lifetime(&self, seconds: i64) -> &Self {
        let claims = claims(self);
        assert_eq!(
            claims.exp - claims.iat,
            seconds,
            "Expected token lifetime of {seconds} seconds"
        );
        self
    }

    fn assert_expires_in(&self, seconds: i64) -> &Self {
        let expires_in = claims(self).exp - chrono::Utc::now().timestamp();
        assert!(
            (expires_in - seconds).abs() <= 5,
            "Expected token to expire in {seconds} seconds, but expires in {expires_in} seconds"
        );
        self
    }

    fn expiry(&self) -> i64 {
        claims(self).exp
    }
}
