//! HTTP/JSON gateway: built-in endpoints, proxied login/refresh and
//! per-provider registration isolation.

use concierge_server::auth::{AuthenticatorService, TokenAuthority};
use concierge_server::server::ServerRuntime;
use concierge_test_utils::{
    directory_subject, service_subject, test_authority, test_registry, test_server_options,
    ConflictingRouteProvider, FailingGatewayProvider, RecordingProvider, TestServer,
    TokenAssertions, DIRECTORY_NAMESPACE, DIRECTORY_PASSWORD, DIRECTORY_USER, SERVICE_ACCOUNT,
    SERVICE_NAMESPACE, SERVICE_SECRET,
};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;

fn login_body(system: &str, value: &str, password: &str) -> Value {
    json!({
        "user": { "system": system, "value": value },
        "password": password,
    })
}

async fn post_json(
    client: &reqwest::Client,
    url: String,
    body: &Value,
    token: Option<&str>,
) -> anyhow::Result<reqwest::Response> {
    let mut request = client.post(url).json(body);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    Ok(request.send().await?)
}

async fn token_from(response: reqwest::Response) -> anyhow::Result<String> {
    let body: Value = response.json().await?;
    Ok(body["token"].as_str().unwrap().to_string())
}

// ============================================================================
// Built-in endpoints
// ============================================================================

#[tokio::test]
async fn test_health_endpoint_returns_ok() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;

    let response = reqwest::get(format!("{}/health", server.http_url())).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "OK");

    server.shutdown().await
}

#[tokio::test]
async fn test_unknown_route_is_not_found() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;

    let response = reqwest::get(format!("{}/v1/nothing-here", server.http_url())).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.shutdown().await
}

// ============================================================================
// Proxied Authenticator
// ============================================================================

#[tokio::test]
async fn test_http_login_refresh_and_delegated_login() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;
    let client = reqwest::Client::new();
    let login_url = format!("{}/v1/auth/login", server.http_url());

    // Service account
    let response = post_json(
        &client,
        login_url.clone(),
        &login_body(SERVICE_NAMESPACE, SERVICE_ACCOUNT, SERVICE_SECRET),
        None,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let service_token = token_from(response).await?;
    service_token
        .assert_valid_jwt()
        .assert_for_subject(&service_subject());

    // Delegated user, anchored by the forwarded Authorization header
    let response = post_json(
        &client,
        login_url,
        &login_body(DIRECTORY_NAMESPACE, DIRECTORY_USER, DIRECTORY_PASSWORD),
        Some(&service_token),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    token_from(response)
        .await?
        .assert_for_subject(&directory_subject());

    // Refresh of a fresh service token returns it unchanged
    let response = post_json(
        &client,
        format!("{}/v1/auth/refresh", server.http_url()),
        &json!({}),
        Some(&service_token),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(token_from(response).await?, service_token);

    server.shutdown().await
}

#[tokio::test]
async fn test_http_failures_map_to_status_codes() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;
    let client = reqwest::Client::new();

    // Wrong secret
    let response = post_json(
        &client,
        format!("{}/v1/auth/login", server.http_url()),
        &login_body(SERVICE_NAMESPACE, SERVICE_ACCOUNT, "nope"),
        None,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await?;
    assert_eq!(body["code"], 16);
    assert_eq!(body["message"], "authentication failed");

    // Missing user
    let response = post_json(
        &client,
        format!("{}/v1/auth/login", server.http_url()),
        &json!({ "password": "x" }),
        None,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Refresh without a token
    let response = post_json(
        &client,
        format!("{}/v1/auth/refresh", server.http_url()),
        &json!({}),
        None,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await?;
    assert_eq!(body["message"], "invalid token");

    server.shutdown().await
}

// ============================================================================
// Registration isolation
// ============================================================================

#[tokio::test]
async fn test_failing_provider_does_not_block_other_gateways() -> anyhow::Result<()> {
    let registry = Arc::new(test_registry(test_authority(1)?)?);
    let mut runtime = ServerRuntime::new(test_server_options(), Some(Arc::clone(&registry)));
    runtime.register("auth", Arc::new(AuthenticatorService::new(registry)))?;
    runtime.register("broken", FailingGatewayProvider::new("/v1/broken"))?;
    runtime.register("pix", RecordingProvider::new("/v1/pix/status", "pix ready"))?;
    // Sorts after "auth", so its claim on the login path loses
    runtime.register("zz-hijack", ConflictingRouteProvider::new("/v1/auth/login"))?;

    let server = TestServer::spawn(runtime).await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/v1/pix/status", server.http_url()))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "pix ready");

    let response = client
        .get(format!("{}/v1/broken", server.http_url()))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = post_json(
        &client,
        format!("{}/v1/auth/login", server.http_url()),
        &login_body(SERVICE_NAMESPACE, SERVICE_ACCOUNT, SERVICE_SECRET),
        None,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    token_from(response).await?.assert_valid_jwt();

    server.shutdown().await
}

#[tokio::test]
async fn test_gateway_serves_providers_without_auth() -> anyhow::Result<()> {
    let mut runtime = ServerRuntime::new(test_server_options(), None);
    runtime.register("pix", RecordingProvider::new("/v1/pix/status", "pix ready"))?;

    let server = TestServer::spawn(runtime).await?;
    let response = reqwest::get(format!("{}/v1/pix/status", server.http_url())).await?;
    assert_eq!(response.status(), StatusCode::OK);

    // The Authenticator is not hosted
    let response = reqwest::Client::new()
        .post(format!("{}/v1/auth/login", server.http_url()))
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.shutdown().await
}

#[tokio::test]
async fn test_http_login_with_persistent_key_verifies_after_restart() -> anyhow::Result<()> {
    let key_file = concierge_test_utils::write_signing_key_file(9)?;
    let server = TestServer::with_auth(TokenAuthority::from_key_file(key_file.path())?).await?;

    let response = post_json(
        &reqwest::Client::new(),
        format!("{}/v1/auth/login", server.http_url()),
        &login_body(SERVICE_NAMESPACE, SERVICE_ACCOUNT, SERVICE_SECRET),
        None,
    )
    .await?;
    let token = token_from(response).await?;
    server.shutdown().await?;

    // A new process loading the same key accepts the token
    let restarted = TokenAuthority::from_key_file(key_file.path())?;
    let call = restarted.parse_token(&token)?;
    assert_eq!(call.identity().value(), SERVICE_ACCOUNT);
    Ok(())
}
