//! Per-call authentication for the RPC front-end.
//!
//! A tower layer wrapped around every RPC route. It reads the bearer token
//! from the `authorization` metadata, validates it with the
//! [`TokenAuthority`], and attaches the resulting [`CallIdentity`] to the
//! request extensions where handlers read it.
//!
//! # Security
//!
//! - Methods on the open list (login, health check) proceed without an
//!   identity when the token is missing or invalid
//! - Every other method is rejected with UNAUTHENTICATED and a generic
//!   message; the reason goes to the operator log
//! - Only methods declared unary at registration are served; anything else
//!   (streaming or undeclared) is rejected with UNIMPLEMENTED
//!
//! A disabled layer (auth turned off for the runtime) passes every call
//! straight to the inner service.

use crate::auth::{CallIdentity, TokenAuthority};
use crate::errors::INVALID_TOKEN_MESSAGE;
use crate::grpc::health::HEALTH_CHECK_PATH;
use axum::http;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::Status;
use tower::{Layer, Service};

/// Login is reachable without a token so service accounts can bootstrap.
pub const LOGIN_PATH: &str = "/apiv1.Authenticator/Login";

/// Refresh needs the caller's current token.
pub const REFRESH_PATH: &str = "/apiv1.Authenticator/Refresh";

/// Which methods skip token enforcement and which may be served at all.
#[derive(Debug, Clone)]
pub struct MethodPolicy {
    open: BTreeSet<String>,
    unary: BTreeSet<String>,
}

impl MethodPolicy {
    /// Policy with the fixed open list and the declared unary paths.
    #[must_use]
    pub fn new(unary: BTreeSet<String>) -> Self {
        let open = [LOGIN_PATH, HEALTH_CHECK_PATH]
            .into_iter()
            .map(String::from)
            .collect();
        Self { open, unary }
    }

    #[must_use]
    pub fn is_open(&self, path: &str) -> bool {
        self.open.contains(path)
    }

    #[must_use]
    pub fn is_unary(&self, path: &str) -> bool {
        self.unary.contains(path)
    }
}

struct AuthState {
    authority: Arc<TokenAuthority>,
    policy: MethodPolicy,
}

enum Decision {
    Proceed,
    Reject(Status),
}

impl AuthState {
    fn decide<B>(&self, req: &mut http::Request<B>) -> Decision {
        let path = req.uri().path().to_string();

        if !self.policy.is_unary(&path) {
            tracing::warn!(target: "concierge.grpc.auth", path = %path, "Rejecting call to a method not declared unary");
            return Decision::Reject(Status::unimplemented(
                "streaming calls are not supported when authentication is enabled",
            ));
        }

        let outcome = match req.headers().get(http::header::AUTHORIZATION) {
            None => Err("missing authorization header".to_string()),
            Some(value) => value
                .to_str()
                .map_err(|_| "invalid authorization header encoding".to_string())
                .and_then(|bearer| {
                    self.authority
                        .parse_token(bearer)
                        .map_err(|e| e.to_string())
                }),
        };

        match outcome {
            Ok(call) => {
                tracing::debug!(
                    target: "concierge.grpc.auth",
                    path = %path,
                    namespace = %call.identity().namespace(),
                    value = %call.identity().value(),
                    "Authenticated call"
                );
                req.extensions_mut().insert::<CallIdentity>(call);
                Decision::Proceed
            }
            Err(reason) if self.policy.is_open(&path) => {
                tracing::debug!(
                    target: "concierge.grpc.auth",
                    path = %path,
                    reason = %reason,
                    "Open method called without valid token"
                );
                Decision::Proceed
            }
            Err(reason) => {
                tracing::warn!(
                    target: "concierge.grpc.auth",
                    path = %path,
                    reason = %reason,
                    "Rejected unauthenticated call"
                );
                Decision::Reject(Status::unauthenticated(INVALID_TOKEN_MESSAGE))
            }
        }
    }
}

/// Tower layer for per-call authentication.
#[derive(Clone, Default)]
pub struct AuthLayer {
    state: Option<Arc<AuthState>>,
}

impl fmt::Debug for AuthLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthLayer")
            .field("enabled", &self.is_enabled())
            .field("policy", &self.state.as_ref().map(|s| &s.policy))
            .finish()
    }
}

impl AuthLayer {
    /// Layer that enforces tokens signed by `authority`.
    #[must_use]
    pub fn new(authority: Arc<TokenAuthority>, policy: MethodPolicy) -> Self {
        Self {
            state: Some(Arc::new(AuthState { authority, policy })),
        }
    }

    /// Layer that passes every call through unchanged.
    #[must_use]
    pub fn disabled() -> Self {
        Self { state: None }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.is_some()
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            state: self.state.clone(),
        }
    }
}

/// Tower service produced by [`AuthLayer`].
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    state: Option<Arc<AuthState>>,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for AuthService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<ReqBody>) -> Self::Future {
        // Call the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let decision = match &self.state {
            Some(state) => state.decide(&mut req),
            None => Decision::Proceed,
        };

        match decision {
            Decision::Proceed => Box::pin(inner.call(req)),
            Decision::Reject(status) => Box::pin(async move { Ok(status.into_http()) }),
        }
    }
}
