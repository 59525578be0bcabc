//! Types and helpers shared across Concierge crates.

#![warn(clippy::pedantic)]

/// Principal identity types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Bearer token helpers (size limit, header parsing, claims)
pub mod jwt;
