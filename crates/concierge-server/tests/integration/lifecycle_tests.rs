//! Runtime lifecycle: coordinated shutdown, provider close, metrics and TLS.

use concierge_server::errors::{ProviderError, RegistrationError};
use concierge_server::server::ServerRuntime;
use concierge_test_utils::{
    service_login_request, service_subject, test_authority, test_server_options,
    write_tls_files, RecordingProvider, TestServer, TokenAssertions, SERVICE_ACCOUNT,
    SERVICE_NAMESPACE, SERVICE_SECRET,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

#[tokio::test]
async fn test_shutdown_stops_both_listeners() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;
    let rpc_addr = server.rpc_addr();
    let http_addr = server.http_addr();

    // Both accept before shutdown
    TcpStream::connect(rpc_addr).await?;
    TcpStream::connect(http_addr).await?;

    tokio::time::timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("shutdown should finish within the grace period")?;

    assert!(TcpStream::connect(rpc_addr).await.is_err());
    assert!(TcpStream::connect(http_addr).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_shutdown_while_client_connected_completes() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;
    let _client = server.authenticator_client().await?;
    let _idle = TcpStream::connect(server.http_addr()).await?;

    tokio::time::timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("idle connections must not hold shutdown past the grace period")?;
    Ok(())
}

#[tokio::test]
async fn test_close_reaches_every_provider_and_reports_first_error() -> anyhow::Result<()> {
    let first = RecordingProvider::failing_close("/v1/a", "a");
    let second = RecordingProvider::new("/v1/b", "b");
    let third = RecordingProvider::failing_close("/v1/c", "c");

    let mut runtime = ServerRuntime::new(test_server_options(), None);
    runtime.register("a", first.clone())?;
    runtime.register("b", second.clone())?;
    runtime.register("c", third.clone())?;

    let server = TestServer::spawn(runtime).await?;
    let runtime = Arc::clone(server.runtime());
    server.shutdown().await?;

    let result = runtime.close().await;
    match result {
        Err(ProviderError::Close(message)) => assert!(message.contains("/v1/a")),
        other => panic!("expected first close error, got {other:?}"),
    }
    assert_eq!(first.close_calls(), 1);
    assert_eq!(second.close_calls(), 1);
    assert_eq!(third.close_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_provider_name_is_rejected_before_serving() {
    let mut runtime = ServerRuntime::new(test_server_options(), None);
    runtime
        .register("pix", RecordingProvider::new("/v1/pix", "one"))
        .unwrap();

    let err = runtime
        .register("pix", RecordingProvider::new("/v1/pix2", "two"))
        .unwrap_err();
    assert_eq!(err, RegistrationError::DuplicateProvider("pix".to_string()));
}

#[tokio::test]
async fn test_metrics_endpoint_served_when_handle_supplied() -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().build_recorder().handle();
    let runtime = ServerRuntime::new(test_server_options(), None).with_metrics(handle);
    let server = TestServer::spawn(runtime).await?;

    let response = reqwest::get(format!("{}/metrics", server.http_url())).await?;
    assert_eq!(response.status(), StatusCode::OK);

    server.shutdown().await
}

#[tokio::test]
async fn test_metrics_endpoint_absent_without_handle() -> anyhow::Result<()> {
    let server = TestServer::spawn(ServerRuntime::new(test_server_options(), None)).await?;

    let response = reqwest::get(format!("{}/metrics", server.http_url())).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.shutdown().await
}

#[tokio::test]
async fn test_tls_serves_rpc_and_https_gateway() -> anyhow::Result<()> {
    let tls = write_tls_files()?;
    let server = TestServer::with_auth_tls(test_authority(1)?, &tls).await?;

    // RPC listener over TLS
    let token = server
        .authenticator_client()
        .await?
        .login(service_login_request())
        .await?
        .into_inner()
        .token;
    token.assert_valid_jwt().assert_for_subject(&service_subject());

    // Gateway over HTTPS, proxying to the RPC listener over TLS
    let client = server.http_client()?;
    let response = client
        .post(format!("{}/v1/auth/login", server.https_url()))
        .json(&json!({
            "user": { "system": SERVICE_NAMESPACE, "value": SERVICE_ACCOUNT },
            "password": SERVICE_SECRET,
        }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    body["token"]
        .as_str()
        .expect("login response carries a token")
        .to_string()
        .assert_valid_jwt()
        .assert_for_subject(&service_subject());

    // Plain HTTP is not answered
    let plain = reqwest::get(format!("http://{}/health", server.http_addr())).await;
    assert!(plain.is_err());

    server.shutdown().await
}
