//! Hosting for backend modules.
//!
//! - [`Provider`] is the capability a backend module implements.
//! - [`ServerRuntime`] owns the RPC listener, the HTTP gateway and the
//!   provider table, and coordinates startup and shutdown.
//! - [`tls`] terminates HTTPS for the gateway when a certificate is set.

pub mod gateway;
pub mod provider;
pub mod runtime;
pub mod tls;

pub use gateway::{grpc_request, status_response, unary_response, GatewayBackend, GatewayScope};
pub use provider::{Provider, RpcRegistrar};
pub use runtime::{shutdown_signal, ServerOptions, ServerRuntime};
