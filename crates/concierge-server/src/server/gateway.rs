//! HTTP/JSON gateway that reverse-proxies to the RPC listener.
//!
//! Each provider registers its routes into its own [`GatewayScope`]. A scope
//! is merged into the gateway only when registration succeeded and none of
//! its paths collide with a claimed route, so one faulty provider cannot take
//! down the HTTP surface of the others.
//!
//! Collisions are checked with `matchit`, the matcher axum routes with, so
//! anything axum would refuse to merge (an exact duplicate, or `/v1/p/:id`
//! next to `/v1/p/:nhs`) is reported as an error instead of a panic.

use crate::errors::{ProviderError, ServerError};
use crate::observability::metrics::record_gateway_registration;
use crate::server::provider::Provider;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Code, Status};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Liveness path served by the gateway itself.
pub const HEALTH_PATH: &str = "/health";

/// Prometheus scrape path served by the gateway itself.
pub const METRICS_PATH: &str = "/metrics";

/// Headers copied from the HTTP request into RPC metadata.
pub const FORWARDED_HEADERS: [&str; 2] = ["authorization", "accept-language"];

/// Metadata key carrying the `Host` the HTTP client asked for.
pub const FORWARDED_HOST: &str = "x-forwarded-host";

/// Where gateway handlers send their RPC calls.
///
/// Holds a lazily-connected channel to the RPC listener, dialled over TLS
/// when the listener serves TLS.
#[derive(Clone)]
pub struct GatewayBackend {
    address: SocketAddr,
    channel: Channel,
}

impl fmt::Debug for GatewayBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayBackend")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl GatewayBackend {
    /// Channel to the RPC listener at `rpc_addr`.
    ///
    /// An unspecified bind address (`0.0.0.0`, `::`) is dialled on loopback.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] if the endpoint or TLS settings
    /// are rejected.
    pub fn new(rpc_addr: SocketAddr, tls: Option<ClientTlsConfig>) -> Result<Self, ServerError> {
        let mut address = rpc_addr;
        if address.ip().is_unspecified() {
            address.set_ip(if address.is_ipv4() {
                Ipv4Addr::LOCALHOST.into()
            } else {
                Ipv6Addr::LOCALHOST.into()
            });
        }

        let scheme = if tls.is_some() { "https" } else { "http" };
        let mut endpoint = Endpoint::from_shared(format!("{scheme}://{address}"))?;
        if let Some(tls) = tls {
            endpoint = endpoint.tls_config(tls)?;
        }

        Ok(Self {
            address,
            channel: endpoint.connect_lazy(),
        })
    }

    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// A handle to the shared channel, for building generated clients.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }
}

/// Routes contributed by one provider.
pub struct GatewayScope {
    provider: String,
    router: Router,
    paths: BTreeSet<String>,
    matcher: matchit::Router<()>,
}

impl fmt::Debug for GatewayScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayScope")
            .field("provider", &self.provider)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl GatewayScope {
    #[must_use]
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            router: Router::new(),
            paths: BTreeSet::new(),
            matcher: matchit::Router::new(),
        }
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    #[must_use]
    pub fn paths(&self) -> &BTreeSet<String> {
        &self.paths
    }

    /// Add a route. Combine methods for one path into a single `MethodRouter`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Gateway`] for a path not starting with `/`,
    /// [`ProviderError::DuplicateRoute`] for a path added twice and
    /// [`ProviderError::RouteConflict`] for a path that overlaps one already
    /// in this scope or is not a valid route pattern.
    pub fn route(
        &mut self,
        path: &str,
        method_router: MethodRouter,
    ) -> Result<&mut Self, ProviderError> {
        if !path.starts_with('/') {
            return Err(ProviderError::Gateway(format!(
                "route {path} must start with '/'"
            )));
        }
        if self.paths.contains(path) {
            return Err(ProviderError::DuplicateRoute(path.to_string()));
        }
        self.matcher
            .insert(path, ())
            .map_err(|e| route_conflict(path, &e))?;
        self.paths.insert(path.to_string());
        self.router = std::mem::take(&mut self.router).route(path, method_router);
        Ok(self)
    }
}

fn route_conflict(path: &str, err: &matchit::InsertError) -> ProviderError {
    ProviderError::RouteConflict {
        path: path.to_string(),
        reason: err.to_string(),
    }
}

/// Checks that every path in `paths` can be routed alongside `claimed`.
///
/// `claimed` holds routes already merged into the gateway, which are known
/// to coexist.
fn check_claims(claimed: &[String], paths: &BTreeSet<String>) -> Result<(), ProviderError> {
    let mut matcher = matchit::Router::new();
    for path in claimed {
        if let Err(e) = matcher.insert(path.as_str(), ()) {
            return Err(route_conflict(path, &e));
        }
    }
    for path in paths {
        if claimed.contains(path) {
            return Err(ProviderError::DuplicateRoute(path.clone()));
        }
        matcher
            .insert(path.as_str(), ())
            .map_err(|e| route_conflict(path, &e))?;
    }
    Ok(())
}

/// Build the gateway router: built-in endpoints plus every provider's routes.
pub fn build_gateway(
    providers: &BTreeMap<String, Arc<dyn Provider>>,
    backend: &GatewayBackend,
    metrics: Option<PrometheusHandle>,
    request_timeout: Duration,
) -> Router {
    let mut claimed = vec![HEALTH_PATH.to_string()];
    let mut router = Router::new().route(HEALTH_PATH, get(health_check));

    if let Some(handle) = metrics {
        claimed.push(METRICS_PATH.to_string());
        router = router.route(
            METRICS_PATH,
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    for (name, provider) in providers {
        let mut scope = GatewayScope::new(name.as_str());
        let result = provider
            .register_http_proxy(&mut scope, backend)
            .and_then(|()| check_claims(&claimed, scope.paths()));

        match result {
            Ok(()) => {
                tracing::info!(
                    target: "concierge.gateway",
                    provider = %name,
                    routes = scope.paths.len(),
                    "Registered gateway routes"
                );
                record_gateway_registration("success");
                claimed.extend(scope.paths.iter().cloned());
                router = router.merge(scope.router);
            }
            Err(e) => {
                tracing::warn!(
                    target: "concierge.gateway",
                    provider = %name,
                    error = %e,
                    "Gateway registration failed; provider has no HTTP surface"
                );
                record_gateway_registration("error");
            }
        }
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
}

/// Liveness handler.
async fn health_check() -> &'static str {
    "OK"
}

/// Wrap `message` in an RPC request carrying the forwarded HTTP headers.
///
/// The HTTP `Host` travels as `x-forwarded-host`.
pub fn grpc_request<T>(headers: &HeaderMap, message: T) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    let forwarded = FORWARDED_HEADERS
        .iter()
        .map(|&name| (name, headers.get(name)))
        .chain([(FORWARDED_HOST, headers.get(header::HOST))]);
    for (name, value) in forwarded {
        let Some(value) = value.and_then(|v| v.to_str().ok()) else {
            continue;
        };
        match MetadataValue::try_from(value) {
            Ok(value) => {
                request.metadata_mut().insert(name, value);
            }
            Err(_) => {
                tracing::debug!(target: "concierge.gateway", header = name, "Dropping unforwardable header");
            }
        }
    }
    request
}

#[derive(Serialize)]
struct ErrorBody {
    code: i32,
    message: String,
}

/// HTTP status for an RPC status code, as grpc-gateway maps them.
#[must_use]
pub fn http_status_for(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
            StatusCode::BAD_REQUEST
        }
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// JSON error response `{code, message}` for a failed RPC.
#[must_use]
pub fn status_response(status: &Status) -> Response {
    let body = ErrorBody {
        code: status.code() as i32,
        message: status.message().to_string(),
    };
    (http_status_for(status.code()), Json(body)).into_response()
}

/// JSON response for a unary RPC result.
pub fn unary_response<T: Serialize>(result: Result<tonic::Response<T>, Status>) -> Response {
    match result {
        Ok(response) => Json(response.into_inner()).into_response(),
        Err(status) => status_response(&status),
    }
}
