//! Concierge server library
//!
//! Authenticated dual-protocol runtime that hosts pluggable backend modules.
//!
//! # Modules
//!
//! - `auth` - Token authority, namespace registry, credential providers and
//!   the Authenticator service
//! - `config` - Environment configuration for the binary
//! - `errors` - Error types
//! - `grpc` - Per-call auth layer and health service
//! - `observability` - Metrics
//! - `server` - Provider capability, HTTP gateway and the runtime lifecycle

pub mod auth;
pub mod config;
pub mod errors;
pub mod grpc;
pub mod observability;
pub mod server;
