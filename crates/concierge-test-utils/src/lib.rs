//! # Concierge Test Utilities
//!
//! Shared test utilities for the Concierge server.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed Ed25519 keys, PEM key files)
//! - A manual clock for driving token expiry
//! - Mock `AuthProvider` and `Provider` implementations
//! - Server test harness (`TestServer` for E2E tests)
//! - Fixed test identities
//! - Custom assertions (`TokenAssertions` trait)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use concierge_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestServer::with_auth(test_authority(1)?).await?;
//!     let mut client = server.authenticator_client().await?;
//!
//!     let token = client.login(service_login_request()).await?.into_inner().token;
//!     token.assert_valid_jwt().assert_for_subject(&service_subject());
//!
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod assertions;
pub mod clock;
pub mod crypto_fixtures;
pub mod mocks;
pub mod server_harness;
pub mod test_ids;

// Re-export commonly used items
pub use assertions::*;
pub use clock::*;
pub use crypto_fixtures::*;
pub use mocks::*;
pub use server_harness::*;
pub use test_ids::*;
