//! The capability a backend module implements to plug into the runtime.

use crate::errors::ProviderError;
use crate::server::gateway::{GatewayBackend, GatewayScope};
use async_trait::async_trait;
use axum::http;
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;
use tonic::body::BoxBody;
use tonic::server::NamedService;
use tonic::service::{Routes, RoutesBuilder};
use tower::Service;

/// A backend module hosted by the runtime.
///
/// Registered under a unique name before the runtime starts. The runtime
/// attaches its RPC surface to the RPC listener and its HTTP surface to the
/// gateway, and calls [`Provider::close`] when the process winds down.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Add this module's RPC services, declaring their unary methods.
    fn register_server(&self, registrar: &mut RpcRegistrar);

    /// Add this module's HTTP routes, proxied to `backend`.
    ///
    /// Routes added to `scope` are only served if this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Any error skips this module's HTTP surface; other modules are unaffected.
    fn register_http_proxy(
        &self,
        scope: &mut GatewayScope,
        backend: &GatewayBackend,
    ) -> Result<(), ProviderError>;

    /// Release backend resources.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Close`] if resources could not be released.
    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Collects RPC services from providers onto the RPC listener.
///
/// Every service comes with the list of its unary methods. While
/// authentication is enabled, a method missing from that list is treated as
/// streaming and refused, so forgetting to declare a method fails closed.
#[derive(Default)]
pub struct RpcRegistrar {
    routes: RoutesBuilder,
    services: Vec<&'static str>,
    unary: BTreeSet<String>,
}

impl fmt::Debug for RpcRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcRegistrar")
            .field("services", &self.services)
            .field("unary", &self.unary)
            .finish()
    }
}

impl RpcRegistrar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a generated tonic service.
    ///
    /// `unary_methods` are full method paths (`/package.Service/Method`).
    /// Paths outside the service are ignored.
    pub fn add_service<S>(&mut self, service: S, unary_methods: &[&str]) -> &mut Self
    where
        S: Service<http::Request<BoxBody>, Response = http::Response<BoxBody>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        let prefix = format!("/{}/", S::NAME);
        for &path in unary_methods {
            if path.starts_with(&prefix) {
                self.unary.insert(path.to_string());
            } else {
                tracing::warn!(
                    target: "concierge.server",
                    service = S::NAME,
                    path,
                    "Ignoring unary method outside its service"
                );
            }
        }
        self.services.push(S::NAME);
        self.routes.add_service(service);
        self
    }

    /// Fully-qualified names of the registered services.
    #[must_use]
    pub fn service_names(&self) -> &[&'static str] {
        &self.services
    }

    #[must_use]
    pub fn unary_paths(&self) -> &BTreeSet<String> {
        &self.unary
    }

    pub(crate) fn into_parts(self) -> (Routes, BTreeSet<String>) {
        (self.routes.routes(), self.unary)
    }
}
