//! Deterministic cryptographic fixtures for testing
//!
//! Provides reproducible Ed25519 signing keys as PKCS#8 DER, PEM text and
//! temporary key files. All fixtures are deterministic based on seed values,
//! except the self-signed TLS pair, which is generated fresh per call.

use common::jwt::encode_pem;
use concierge_server::auth::TokenAuthority;
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::io::Write;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Fixture file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),
}

/// Self-signed certificate for `localhost` written to temporary PEM files.
///
/// Clients trust `cert_pem` as their root and verify the `localhost` name.
pub struct TlsFixture {
    pub cert_pem: String,
    pub cert_file: NamedTempFile,
    pub key_file: NamedTempFile,
}

/// Generate a [`TlsFixture`]. The files live as long as the fixture.
pub fn write_tls_files() -> Result<TlsFixture, FixtureError> {
    let certified =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])?;
    let cert_pem = certified.cert.pem();

    let mut cert_file = NamedTempFile::new()?;
    cert_file.write_all(cert_pem.as_bytes())?;
    cert_file.flush()?;

    let mut key_file = NamedTempFile::new()?;
    key_file.write_all(certified.key_pair.serialize_pem().as_bytes())?;
    key_file.flush()?;

    Ok(TlsFixture {
        cert_pem,
        cert_file,
        key_file,
    })
}

/// Deterministic 32-byte Ed25519 seed.
pub fn test_seed(seed: u8) -> [u8; 32] {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }
    seed_bytes
}

/// Deterministic Ed25519 signing key for testing.
///
/// The same seed always produces the same key pair.
///
/// # Returns
/// * `Ok((public_key_bytes, private_key_pkcs8))` - raw 32-byte public key and PKCS#8 v1 DER
pub fn test_signing_key(seed: u8) -> Result<(Vec<u8>, Vec<u8>), FixtureError> {
    let seed_bytes = test_seed(seed);
    let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate test keypair: {e:?}")))?;

    Ok((
        key_pair.public_key().as_ref().to_vec(),
        build_pkcs8_from_seed(&seed_bytes),
    ))
}

/// PEM-armoured PKCS#8 signing key, as `openssl genpkey -algorithm ed25519` writes it.
pub fn test_signing_key_pem(seed: u8) -> Result<String, FixtureError> {
    let (_, pkcs8) = test_signing_key(seed)?;
    Ok(encode_pem("PRIVATE KEY", &pkcs8))
}

/// Write the PEM signing key for `seed` to a temporary file.
///
/// The file is deleted when the returned handle is dropped.
pub fn write_signing_key_file(seed: u8) -> Result<NamedTempFile, FixtureError> {
    let mut file = NamedTempFile::new()?;
    file.write_all(test_signing_key_pem(seed)?.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Token authority signing with the deterministic key for `seed`.
pub fn test_authority(seed: u8) -> Result<TokenAuthority, FixtureError> {
    let (_, pkcs8) = test_signing_key(seed)?;
    TokenAuthority::from_pkcs8(&pkcs8).map_err(|e| FixtureError::Crypto(e.to_string()))
}

/// Build PKCS#8 v1 document from Ed25519 seed
///
/// This is a test-only utility. Production code must use ring::rand::SystemRandom.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    // SEQUENCE { version INTEGER 0, AlgorithmIdentifier { OID 1.3.101.112 },
    //            privateKey OCTET STRING { OCTET STRING seed } }
    let mut pkcs8 = Vec::with_capacity(48);
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);
    pkcs8
}
