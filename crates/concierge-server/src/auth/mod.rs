//! Authentication: token lifecycle and the service/delegated trust chain.
//!
//! - [`TokenAuthority`] signs and validates bearer tokens (EdDSA).
//! - [`AuthProviderRegistry`] maps namespaces to credential validators and
//!   enforces that delegated users only log in under a service-account session.
//! - [`AuthenticatorService`] exposes login/refresh over RPC and the gateway.

pub mod clock;
pub mod providers;
pub mod registry;
pub mod service;
pub mod token;

pub use clock::{Clock, SystemClock};
pub use providers::{generate_credentials, BcryptAuthProvider, StaticAuthProvider};
pub use registry::{AuthProvider, AuthProviderRegistry};
pub use service::AuthenticatorService;
pub use token::{
    CallIdentity, TokenAuthority, DEFAULT_TOKEN_LIFETIME, REFRESH_THRESHOLD,
    SERVICE_ACCOUNT_TOKEN_LIFETIME,
};
