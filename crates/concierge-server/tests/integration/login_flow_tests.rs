//! End-to-end login and refresh over the RPC listener.
//!
//! A service account logs in directly, then anchors a delegated-user login
//! with its token. Refresh is driven by a manual clock shared with the
//! server's token authority.

use chrono::TimeDelta;
use concierge_test_utils::{
    directory_login_request, directory_subject, login_request, service_login_request,
    service_subject, test_authority, with_bearer, ManualClock, TestServer, TokenAssertions,
    DIRECTORY_NAMESPACE, DIRECTORY_USER, SERVICE_ACCOUNT, SERVICE_NAMESPACE,
};
use proto_gen::apiv1::TokenRefreshRequest;
use tonic::Code;

const SERVICE_LIFETIME_SECS: i64 = 72 * 3600;
const DELEGATED_LIFETIME_SECS: i64 = 5 * 60;

#[tokio::test]
async fn test_service_account_then_delegated_login_and_refresh() -> anyhow::Result<()> {
    // Arrange
    let clock = ManualClock::starting_now();
    let server = TestServer::with_auth(test_authority(1)?.with_clock(clock.clone())).await?;
    let mut client = server.authenticator_client().await?;

    // Act: service account logs in without a session
    let service_token = client
        .login(service_login_request())
        .await?
        .into_inner()
        .token;

    // Assert
    service_token
        .assert_valid_jwt()
        .assert_for_subject(&service_subject())
        .assert_lifetime(SERVICE_LIFETIME_SECS);

    // Act: delegated user logs in under the service session
    let user_token = client
        .login(with_bearer(directory_login_request(), &service_token))
        .await?
        .into_inner()
        .token;

    // Assert
    user_token
        .assert_valid_jwt()
        .assert_for_subject(&directory_subject())
        .assert_lifetime(DELEGATED_LIFETIME_SECS);

    // A delegated token never has more than the refresh threshold left, so
    // refresh reissues; with the clock unmoved the expiry is not extended
    let reissued = client
        .refresh(with_bearer(TokenRefreshRequest {}, &user_token))
        .await?
        .into_inner()
        .token;
    reissued
        .assert_for_subject(&directory_subject())
        .assert_lifetime(DELEGATED_LIFETIME_SECS);
    assert_eq!(reissued.expiry(), user_token.expiry());

    // 4m59s later a new token with a later expiry is issued
    clock.advance(TimeDelta::minutes(4) + TimeDelta::seconds(59));
    let renewed = client
        .refresh(with_bearer(TokenRefreshRequest {}, &user_token))
        .await?
        .into_inner()
        .token;

    assert_ne!(renewed, user_token);
    renewed
        .assert_for_subject(&directory_subject())
        .assert_lifetime(DELEGATED_LIFETIME_SECS);
    assert!(renewed.expiry() > user_token.expiry());

    server.shutdown().await
}

#[tokio::test]
async fn test_service_token_refresh_is_idempotent_for_hours() -> anyhow::Result<()> {
    let clock = ManualClock::starting_now();
    let server = TestServer::with_auth(test_authority(1)?.with_clock(clock.clone())).await?;
    let mut client = server.authenticator_client().await?;

    let token = client
        .login(service_login_request())
        .await?
        .into_inner()
        .token;

    clock.advance(TimeDelta::hours(71));
    let refreshed = client
        .refresh(with_bearer(TokenRefreshRequest {}, &token))
        .await?
        .into_inner()
        .token;
    assert_eq!(refreshed, token);

    clock.advance(TimeDelta::minutes(56));
    let renewed = client
        .refresh(with_bearer(TokenRefreshRequest {}, &token))
        .await?
        .into_inner()
        .token;
    assert_ne!(renewed, token);
    renewed.assert_lifetime(SERVICE_LIFETIME_SECS);

    server.shutdown().await
}

#[tokio::test]
async fn test_delegated_login_without_session_is_unauthenticated() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;
    let mut client = server.authenticator_client().await?;

    let status = client.login(directory_login_request()).await.unwrap_err();

    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), "authentication failed");

    server.shutdown().await
}

#[tokio::test]
async fn test_delegated_login_under_delegated_session_is_unauthenticated() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;
    let mut client = server.authenticator_client().await?;

    let service_token = client
        .login(service_login_request())
        .await?
        .into_inner()
        .token;
    let user_token = client
        .login(with_bearer(directory_login_request(), &service_token))
        .await?
        .into_inner()
        .token;

    // A delegated session cannot anchor another delegated login
    let status = client
        .login(with_bearer(directory_login_request(), &user_token))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    server.shutdown().await
}

#[tokio::test]
async fn test_wrong_credential_and_unknown_namespace_are_unauthenticated() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;
    let mut client = server.authenticator_client().await?;

    let wrong_secret = client
        .login(login_request(SERVICE_NAMESPACE, SERVICE_ACCOUNT, "not-it"))
        .await
        .unwrap_err();
    assert_eq!(wrong_secret.code(), Code::Unauthenticated);

    let unknown = client
        .login(login_request("https://example.org/Id/unknown", "x", "y"))
        .await
        .unwrap_err();
    assert_eq!(unknown.code(), Code::Unauthenticated);

    // Both failures look identical to the caller
    assert_eq!(wrong_secret.message(), unknown.message());

    server.shutdown().await
}

#[tokio::test]
async fn test_delegated_wrong_password_is_unauthenticated() -> anyhow::Result<()> {
    let server = TestServer::with_auth(test_authority(1)?).await?;
    let mut client = server.authenticator_client().await?;

    let service_token = client
        .login(service_login_request())
        .await?
        .into_inner()
        .token;
    let status = client
        .login(with_bearer(
            login_request(DIRECTORY_NAMESPACE, DIRECTORY_USER, "guess"),
            &service_token,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    server.shutdown().await
}
