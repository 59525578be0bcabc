//! The `apiv1.Authenticator` service: login and refresh over RPC and HTTP.
//!
//! Registered with the runtime as an ordinary [`Provider`]. Its HTTP routes
//! call back into the RPC listener, so they pass through the same auth layer
//! as native RPC clients.

use crate::auth::registry::AuthProviderRegistry;
use crate::auth::token::CallIdentity;
use crate::errors::{AuthError, ProviderError};
use crate::grpc::auth_layer::{LOGIN_PATH, REFRESH_PATH};
use crate::server::gateway::{grpc_request, unary_response, GatewayBackend, GatewayScope};
use crate::server::provider::{Provider, RpcRegistrar};
use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Json;
use common::secret::SecretString;
use common::types::Identity;
use proto_gen::apiv1::authenticator_client::AuthenticatorClient;
use proto_gen::apiv1::authenticator_server::{Authenticator, AuthenticatorServer};
use proto_gen::apiv1::{LoginRequest, LoginResponse, TokenRefreshRequest};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// HTTP route for login.
pub const LOGIN_HTTP_PATH: &str = "/v1/auth/login";

/// HTTP route for refresh.
pub const REFRESH_HTTP_PATH: &str = "/v1/auth/refresh";

/// Login/refresh handlers backed by an [`AuthProviderRegistry`].
#[derive(Debug, Clone)]
pub struct AuthenticatorService {
    registry: Arc<AuthProviderRegistry>,
}

impl AuthenticatorService {
    #[must_use]
    pub fn new(registry: Arc<AuthProviderRegistry>) -> Self {
        Self { registry }
    }
}

#[tonic::async_trait]
impl Authenticator for AuthenticatorService {
    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        let caller = request.extensions().get::<CallIdentity>().cloned();
        let LoginRequest { user, password } = request.into_inner();

        let user = user.ok_or_else(|| Status::invalid_argument("user is required"))?;
        let identity = Identity::new(user.system, user.value).map_err(AuthError::from)?;
        let credential = SecretString::from(password);

        let token = self
            .registry
            .login(caller.as_ref(), &identity, &credential)
            .await?;
        Ok(Response::new(LoginResponse { token }))
    }

    async fn refresh(
        &self,
        request: Request<TokenRefreshRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        let caller = request.extensions().get::<CallIdentity>();
        let token = self.registry.refresh(caller)?;
        Ok(Response::new(LoginResponse { token }))
    }
}

#[async_trait]
impl Provider for AuthenticatorService {
    fn register_server(&self, registrar: &mut RpcRegistrar) {
        registrar.add_service(
            AuthenticatorServer::new(self.clone()),
            &[LOGIN_PATH, REFRESH_PATH],
        );
    }

    fn register_http_proxy(
        &self,
        scope: &mut GatewayScope,
        backend: &GatewayBackend,
    ) -> Result<(), ProviderError> {
        let channel = backend.channel();
        scope.route(
            LOGIN_HTTP_PATH,
            post(move |headers: HeaderMap, Json(body): Json<LoginRequest>| {
                let mut client = AuthenticatorClient::new(channel.clone());
                async move { unary_response(client.login(grpc_request(&headers, body)).await) }
            }),
        )?;

        let channel = backend.channel();
        scope.route(
            REFRESH_HTTP_PATH,
            post(move |headers: HeaderMap, Json(body): Json<TokenRefreshRequest>| {
                let mut client = AuthenticatorClient::new(channel.clone());
                async move { unary_response(client.refresh(grpc_request(&headers, body)).await) }
            }),
        )?;
        Ok(())
    }
}
