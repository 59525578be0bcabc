//! Per-call enforcement on the RPC listener: open methods, protected
//! methods and streaming rejection, with auth enabled and disabled.

use chrono::TimeDelta;
use common::types::Identity;
use concierge_server::auth::{AuthenticatorService, TokenAuthority};
use concierge_server::server::ServerRuntime;
use concierge_test_utils::{
    service_login_request, test_authority, test_registry, test_server_options, with_bearer,
    TestServer, TickerProvider, SERVICE_ACCOUNT, SERVICE_NAMESPACE, TICKER_GET_PATH,
    TICKER_WATCH_PATH,
};
use proto_gen::apiv1::TokenRefreshRequest;
use std::sync::Arc;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::{Code, Request, Status};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::{HealthCheckRequest, HealthCheckResponse};

fn health_request() -> HealthCheckRequest {
    HealthCheckRequest {
        service: String::new(),
    }
}

// ============================================================================
// Open methods
// ============================================================================

#[tokio::test]
async fn test_health_check_without_token_is_serving() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;
    let mut health = HealthClient::new(server.channel().await?);

    let response = health.check(health_request()).await?.into_inner();
    assert_eq!(response.status, ServingStatus::Serving as i32);

    server.shutdown().await
}

#[tokio::test]
async fn test_health_check_with_garbage_token_still_serving() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;
    let mut health = HealthClient::new(server.channel().await?);

    let response = health
        .check(with_bearer(health_request(), "not.a.token"))
        .await?
        .into_inner();
    assert_eq!(response.status, ServingStatus::Serving as i32);

    server.shutdown().await
}

#[tokio::test]
async fn test_login_with_invalid_token_proceeds_without_identity() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;
    let mut client = server.authenticator_client().await?;

    // A service-account login needs no session, so a bad token is ignored
    let token = client
        .login(with_bearer(service_login_request(), "not.a.token"))
        .await?
        .into_inner()
        .token;
    assert!(!token.is_empty());

    server.shutdown().await
}

// ============================================================================
// Protected methods
// ============================================================================

#[tokio::test]
async fn test_refresh_without_token_is_unauthenticated() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;
    let mut client = server.authenticator_client().await?;

    let status = client.refresh(TokenRefreshRequest {}).await.unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), "invalid token");

    server.shutdown().await
}

#[tokio::test]
async fn test_refresh_with_foreign_or_expired_token_is_unauthenticated() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;
    let mut client = server.authenticator_client().await?;
    let identity = Identity::new(SERVICE_NAMESPACE, SERVICE_ACCOUNT)?;

    // Signed by a different key
    let foreign = test_authority(2)?.generate_token(&identity, TimeDelta::hours(1))?;
    let status = client
        .refresh(with_bearer(TokenRefreshRequest {}, &foreign))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    // Right key, already expired
    let expired = test_authority(1)?.generate_token(&identity, TimeDelta::seconds(-1))?;
    let status = client
        .refresh(with_bearer(TokenRefreshRequest {}, &expired))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    // Same generic message for every rejection
    assert_eq!(status.message(), "invalid token");

    server.shutdown().await
}

#[tokio::test]
async fn test_tokens_from_ephemeral_keys_do_not_survive_restart() -> anyhow::Result<()> {
    let identity = Identity::new(SERVICE_NAMESPACE, SERVICE_ACCOUNT)?;
    let previous_process = TokenAuthority::ephemeral()?;
    let token = previous_process.generate_token(&identity, TimeDelta::hours(1))?;

    let server = TestServer::with_auth(TokenAuthority::ephemeral()?).await?;
    let mut client = server.authenticator_client().await?;

    let status = client
        .refresh(with_bearer(TokenRefreshRequest {}, &token))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    server.shutdown().await
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn test_streaming_watch_is_unimplemented_even_with_valid_token() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;
    let mut client = server.authenticator_client().await?;
    let token = client
        .login(service_login_request())
        .await?
        .into_inner()
        .token;

    let mut health = HealthClient::new(server.channel().await?);
    let status = health
        .watch(with_bearer(health_request(), &token))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);

    server.shutdown().await
}

/// Runtime hosting the ticker, plus the Authenticator when `auth` is set.
async fn ticker_server(auth: bool, ticker: Arc<TickerProvider>) -> anyhow::Result<TestServer> {
    let mut runtime = if auth {
        let registry = Arc::new(test_registry(test_authority(1)?)?);
        let mut runtime = ServerRuntime::new(test_server_options(), Some(Arc::clone(&registry)));
        runtime.register("auth", Arc::new(AuthenticatorService::new(registry)))?;
        runtime
    } else {
        ServerRuntime::new(test_server_options(), None)
    };
    runtime.register("ticker", ticker)?;
    TestServer::spawn(runtime).await
}

/// Open a server-streaming call on `path`.
async fn open_stream(
    channel: Channel,
    path: &'static str,
    request: Request<HealthCheckRequest>,
) -> Result<(), Status> {
    let mut grpc = Grpc::new(channel);
    grpc.ready()
        .await
        .map_err(|e| Status::unavailable(e.to_string()))?;
    grpc.server_streaming(
        request,
        PathAndQuery::from_static(path),
        ProstCodec::<HealthCheckRequest, HealthCheckResponse>::default(),
    )
    .await
    .map(|_| ())
}

#[tokio::test]
async fn test_method_not_declared_unary_is_unimplemented() -> anyhow::Result<()> {
    let ticker = TickerProvider::new();
    let server = ticker_server(true, Arc::clone(&ticker)).await?;
    let token = server
        .authenticator_client()
        .await?
        .login(service_login_request())
        .await?
        .into_inner()
        .token;

    // Declared method reaches the service
    open_stream(
        server.channel().await?,
        TICKER_GET_PATH,
        with_bearer(health_request(), &token),
    )
    .await?;
    assert_eq!(ticker.calls(), 1);

    // Undeclared method is refused before it reaches the service
    let status = open_stream(
        server.channel().await?,
        TICKER_WATCH_PATH,
        with_bearer(health_request(), &token),
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);
    assert_eq!(ticker.calls(), 1);

    server.shutdown().await
}

// ============================================================================
// Auth disabled
// ============================================================================

#[tokio::test]
async fn test_auth_disabled_serves_undeclared_methods() -> anyhow::Result<()> {
    let ticker = TickerProvider::new();
    let server = ticker_server(false, Arc::clone(&ticker)).await?;

    open_stream(
        server.channel().await?,
        TICKER_WATCH_PATH,
        Request::new(health_request()),
    )
    .await?;
    assert_eq!(ticker.calls(), 1);

    server.shutdown().await
}

#[tokio::test]
async fn test_auth_disabled_passes_calls_through() -> anyhow::Result<()> {
    let server = TestServer::spawn(ServerRuntime::new(test_server_options(), None)).await?;
    let mut health = HealthClient::new(server.channel().await?);

    let response = health.check(health_request()).await?.into_inner();
    assert_eq!(response.status, ServingStatus::Serving as i32);

    // No Authenticator is hosted without auth
    let mut client = server.authenticator_client().await?;
    let status = client.refresh(TokenRefreshRequest {}).await.unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);

    server.shutdown().await
}
