//! Observability for the Concierge server.
//!
//! Tracing spans use `#[instrument(skip_all)]` with explicit fields. Identity
//! namespace and value are safe to log; credentials, raw tokens and key
//! material never are.

pub mod metrics;
