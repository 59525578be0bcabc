//! Error types for the Concierge server.
//!
//! Every variant that can reach a caller maps to a deliberately coarse
//! [`tonic::Status`]; the detail stays in the operator log.

use common::types::IdentityError;
use std::path::PathBuf;
use thiserror::Error;
use tonic::Status;

/// Generic message for every token rejection.
pub const INVALID_TOKEN_MESSAGE: &str = "invalid token";

/// Token minting and parsing failures.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to read signing key {path}: {source}")]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,
}

/// Collaborator failures: backends, credential stores, gateway wiring.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("gateway registration failed: {0}")]
    Gateway(String),

    #[error("route {0} is already registered")]
    DuplicateRoute(String),

    #[error("route {path} cannot be registered: {reason}")]
    RouteConflict { path: String, reason: String },

    #[error("close failed: {0}")]
    Close(String),
}

/// Wiring collisions detected while the runtime is being assembled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("an auth provider is already registered for namespace {0}")]
    DuplicateNamespace(String),

    #[error("a provider named {0} is already registered")]
    DuplicateProvider(String),

    #[error("registration name must not be empty")]
    EmptyName,
}

/// Login and refresh failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no auth provider registered for namespace {0}")]
    UnknownNamespace(String),

    #[error("login for namespace {0} requires a service-account session")]
    ServiceAccountRequired(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("auth provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("no authenticated identity on the call")]
    MissingIdentity,

    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    #[error("token error: {0}")]
    Token(#[from] TokenError),
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::UnknownNamespace(_)
            | AuthError::ServiceAccountRequired(_)
            | AuthError::InvalidCredentials
            | AuthError::Provider(_)
            | AuthError::MissingIdentity => Status::unauthenticated("authentication failed"),
            AuthError::InvalidIdentity(e) => Status::invalid_argument(e.to_string()),
            AuthError::Token(TokenError::InvalidToken(_) | TokenError::Expired) => {
                Status::unauthenticated(INVALID_TOKEN_MESSAGE)
            }
            AuthError::Token(_) => Status::internal("internal error"),
        }
    }
}

/// Startup and serving failures. All of these are fatal.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("RPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("HTTP gateway error: {0}")]
    Http(#[source] std::io::Error),

    #[error("signing key error: {0}")]
    Token(#[from] TokenError),

    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("server task failed: {0}")]
    Task(String),
}
