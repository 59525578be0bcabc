//! Mock collaborators: credential validators and backend modules.

use async_trait::async_trait;
use axum::routing::{get, post};
use common::secret::{ExposeSecret, SecretString};
use common::types::Identity;
use concierge_server::auth::AuthProvider;
use concierge_server::errors::ProviderError;
use concierge_server::server::{GatewayBackend, GatewayScope, Provider, RpcRegistrar};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::{empty_body, BoxBody};
use tonic::codegen::http;
use tonic::server::NamedService;
use tower::Service;

/// Accepts a fixed set of `value -> credential` pairs and counts calls.
#[derive(Debug, Default)]
pub struct MockAuthProvider {
    accounts: HashMap<String, String>,
    calls: AtomicUsize,
}

impl MockAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider accepting one account.
    pub fn accepting(value: &str, credential: &str) -> Arc<Self> {
        Arc::new(Self::new().with_account(value, credential))
    }

    pub fn with_account(mut self, value: &str, credential: &str) -> Self {
        self.accounts.insert(value.to_string(), credential.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthProvider for MockAuthProvider {
    async fn authenticate(
        &self,
        identity: &Identity,
        credential: &SecretString,
    ) -> Result<bool, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .accounts
            .get(identity.value())
            .is_some_and(|expected| expected == credential.expose_secret()))
    }
}

/// Always fails with a backend error carrying `message`.
#[derive(Debug)]
pub struct FailingAuthProvider {
    message: String,
}

impl FailingAuthProvider {
    pub fn new(message: &str) -> Arc<Self> {
        Arc::new(Self {
            message: message.to_string(),
        })
    }
}

#[async_trait]
impl AuthProvider for FailingAuthProvider {
    async fn authenticate(
        &self,
        _identity: &Identity,
        _credential: &SecretString,
    ) -> Result<bool, ProviderError> {
        Err(ProviderError::Backend(self.message.clone()))
    }
}

/// Backend module with one HTTP route that answers `body` directly.
///
/// Counts `close` calls and can be made to fail on close.
#[derive(Debug)]
pub struct RecordingProvider {
    path: String,
    body: &'static str,
    fail_close: bool,
    closed: AtomicUsize,
}

impl RecordingProvider {
    pub fn new(path: &str, body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            path: path.to_string(),
            body,
            fail_close: false,
            closed: AtomicUsize::new(0),
        })
    }

    pub fn failing_close(path: &str, body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            path: path.to_string(),
            body,
            fail_close: true,
            closed: AtomicUsize::new(0),
        })
    }

    pub fn close_calls(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn register_server(&self, _registrar: &mut RpcRegistrar) {}

    fn register_http_proxy(
        &self,
        scope: &mut GatewayScope,
        _backend: &GatewayBackend,
    ) -> Result<(), ProviderError> {
        let body = self.body;
        scope.route(&self.path, get(move || async move { body }))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(ProviderError::Close(format!("{} still in use", self.path)));
        }
        Ok(())
    }
}

/// Adds a route and then fails its gateway registration.
#[derive(Debug)]
pub struct FailingGatewayProvider {
    path: String,
}

impl FailingGatewayProvider {
    pub fn new(path: &str) -> Arc<Self> {
        Arc::new(Self {
            path: path.to_string(),
        })
    }
}

#[async_trait]
impl Provider for FailingGatewayProvider {
    fn register_server(&self, _registrar: &mut RpcRegistrar) {}

    fn register_http_proxy(
        &self,
        scope: &mut GatewayScope,
        _backend: &GatewayBackend,
    ) -> Result<(), ProviderError> {
        scope.route(&self.path, get(|| async { "should never be served" }))?;
        Err(ProviderError::Gateway("upstream descriptor unavailable".to_string()))
    }
}

/// Claims a path some other provider is expected to own.
#[derive(Debug)]
pub struct ConflictingRouteProvider {
    path: String,
}

impl ConflictingRouteProvider {
    pub fn new(path: &str) -> Arc<Self> {
        Arc::new(Self {
            path: path.to_string(),
        })
    }
}

#[async_trait]
impl Provider for ConflictingRouteProvider {
    fn register_server(&self, _registrar: &mut RpcRegistrar) {}

    fn register_http_proxy(
        &self,
        scope: &mut GatewayScope,
        _backend: &GatewayBackend,
    ) -> Result<(), ProviderError> {
        scope.route(&self.path, post(|| async { "hijacked" }))?;
        Ok(())
    }
}

/// Unary method of [`TickerService`].
pub const TICKER_GET_PATH: &str = "/concierge.test.Ticker/Get";
/// Streaming method of [`TickerService`]; never declared unary.
pub const TICKER_WATCH_PATH: &str = "/concierge.test.Ticker/Watch";

/// RPC service that answers every method with an empty OK response.
#[derive(Debug, Clone, Default)]
pub struct TickerService {
    calls: Arc<AtomicUsize>,
}

impl TickerService {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NamedService for TickerService {
    const NAME: &'static str = "concierge.test.Ticker";
}

impl Service<http::Request<BoxBody>> for TickerService {
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _request: http::Request<BoxBody>) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = http::Response::builder()
            .header("content-type", "application/grpc")
            .header("grpc-status", "0")
            .body(empty_body())
            .expect("static response parts are valid");
        ready(Ok(response))
    }
}

/// Hosts [`TickerService`], declaring only `Get` as unary.
#[derive(Debug, Default)]
pub struct TickerProvider {
    service: TickerService,
}

impl TickerProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Calls that reached the service past the auth layer.
    pub fn calls(&self) -> usize {
        self.service.calls()
    }
}

#[async_trait]
impl Provider for TickerProvider {
    fn register_server(&self, registrar: &mut RpcRegistrar) {
        registrar.add_service(self.service.clone(), &[TICKER_GET_PATH]);
    }

    fn register_http_proxy(
        &self,
        _scope: &mut GatewayScope,
        _backend: &GatewayBackend,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}
