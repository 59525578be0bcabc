//! Test server harness for E2E testing
//!
//! Provides `TestServer` for running a real `ServerRuntime` on ephemeral
//! loopback ports in tests, optionally with TLS on both listeners.

use crate::crypto_fixtures::TlsFixture;
use crate::mocks::MockAuthProvider;
use crate::test_ids::{
    DIRECTORY_NAMESPACE, DIRECTORY_PASSWORD, DIRECTORY_USER, SERVICE_ACCOUNT, SERVICE_NAMESPACE,
    SERVICE_SECRET,
};
use concierge_server::auth::{AuthProviderRegistry, AuthenticatorService, TokenAuthority};
use concierge_server::errors::ServerError;
use concierge_server::server::{ServerOptions, ServerRuntime};
use proto_gen::apiv1::authenticator_client::AuthenticatorClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataValue;
use tonic::transport::{Certificate, Channel, ClientTlsConfig};

/// Options for a loopback runtime with a short drain period.
pub fn test_server_options() -> ServerOptions {
    ServerOptions {
        bind_host: "127.0.0.1".to_string(),
        rpc_port: 0,
        rest_port: 0,
        shutdown_grace: Duration::from_secs(2),
        request_timeout: Duration::from_secs(5),
        ..ServerOptions::default()
    }
}

/// Registry with the test service-account and directory namespaces.
///
/// - `svc` (service account) accepts `acct-1` / `s3cr3t`
/// - `directory-user` accepts `alice` / `pw`
pub fn test_registry(authority: TokenAuthority) -> anyhow::Result<AuthProviderRegistry> {
    let mut registry = AuthProviderRegistry::new(Arc::new(authority));
    registry.register_auth_provider(
        SERVICE_NAMESPACE,
        "mock-service",
        MockAuthProvider::accepting(SERVICE_ACCOUNT, SERVICE_SECRET),
        true,
    )?;
    registry.register_auth_provider(
        DIRECTORY_NAMESPACE,
        "mock-directory",
        MockAuthProvider::accepting(DIRECTORY_USER, DIRECTORY_PASSWORD),
        false,
    )?;
    Ok(registry)
}

/// A running runtime on `127.0.0.1` ephemeral ports.
///
/// # Example
/// ```rust,ignore
/// let server = TestServer::with_auth(test_authority(1)?).await?;
/// let response = reqwest::get(format!("{}/health", server.http_url())).await?;
/// assert_eq!(response.status(), 200);
/// server.shutdown().await?;
/// ```
pub struct TestServer {
    rpc_addr: SocketAddr,
    http_addr: SocketAddr,
    runtime: Arc<ServerRuntime>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), ServerError>>,
    tls_ca: Option<String>,
}

impl TestServer {
    /// Serve `runtime` on freshly bound loopback listeners.
    pub async fn spawn(runtime: ServerRuntime) -> anyhow::Result<Self> {
        let rpc_listener = TcpListener::bind("127.0.0.1:0").await?;
        let http_listener = TcpListener::bind("127.0.0.1:0").await?;
        let rpc_addr = rpc_listener.local_addr()?;
        let http_addr = http_listener.local_addr()?;

        let runtime = Arc::new(runtime);
        let shutdown = CancellationToken::new();

        let serving = Arc::clone(&runtime);
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            serving.serve(rpc_listener, http_listener, token).await
        });

        Ok(Self {
            rpc_addr,
            http_addr,
            runtime,
            shutdown,
            handle,
            tls_ca: None,
        })
    }

    /// Serve `runtime` whose options carry `tls`'s certificate files.
    ///
    /// Clients built by this harness trust the fixture certificate.
    pub async fn spawn_tls(runtime: ServerRuntime, tls: &TlsFixture) -> anyhow::Result<Self> {
        let mut server = Self::spawn(runtime).await?;
        server.tls_ca = Some(tls.cert_pem.clone());
        Ok(server)
    }

    /// Runtime with the Authenticator registered over [`test_registry`].
    pub async fn with_auth(authority: TokenAuthority) -> anyhow::Result<Self> {
        let registry = Arc::new(test_registry(authority)?);
        let mut runtime = ServerRuntime::new(test_server_options(), Some(Arc::clone(&registry)));
        runtime.register("auth", Arc::new(AuthenticatorService::new(registry)))?;
        Self::spawn(runtime).await
    }

    /// Like [`TestServer::with_auth`], with both listeners on TLS.
    pub async fn with_auth_tls(authority: TokenAuthority, tls: &TlsFixture) -> anyhow::Result<Self> {
        let registry = Arc::new(test_registry(authority)?);
        let options = ServerOptions {
            cert_file: Some(tls.cert_file.path().to_path_buf()),
            key_file: Some(tls.key_file.path().to_path_buf()),
            ..test_server_options()
        };
        let mut runtime = ServerRuntime::new(options, Some(Arc::clone(&registry)));
        runtime.register("auth", Arc::new(AuthenticatorService::new(registry)))?;
        Self::spawn_tls(runtime, tls).await
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    fn scheme(&self) -> &'static str {
        if self.tls_ca.is_some() {
            "https"
        } else {
            "http"
        }
    }

    pub fn rpc_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.rpc_addr)
    }

    pub fn http_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.http_addr)
    }

    /// Gateway base URL addressed by the certificate's host name.
    pub fn https_url(&self) -> String {
        format!("https://localhost:{}", self.http_addr.port())
    }

    pub fn runtime(&self) -> &Arc<ServerRuntime> {
        &self.runtime
    }

    /// Connected channel to the RPC listener.
    pub async fn channel(&self) -> anyhow::Result<Channel> {
        let mut endpoint = Channel::from_shared(self.rpc_url())?;
        if let Some(ca) = &self.tls_ca {
            endpoint = endpoint.tls_config(
                ClientTlsConfig::new()
                    .ca_certificate(Certificate::from_pem(ca))
                    .domain_name("localhost"),
            )?;
        }
        Ok(endpoint.connect().await?)
    }

    /// HTTP client for the gateway, trusting the test certificate when TLS is on.
    pub fn http_client(&self) -> anyhow::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(ca) = &self.tls_ca {
            builder = builder
                .add_root_certificate(reqwest::Certificate::from_pem(ca.as_bytes())?)
                .resolve("localhost", self.http_addr);
        }
        Ok(builder.build()?)
    }

    pub async fn authenticator_client(&self) -> anyhow::Result<AuthenticatorClient<Channel>> {
        Ok(AuthenticatorClient::new(self.channel().await?))
    }

    /// Cancel serving and wait for the runtime to stop.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        self.handle.await??;
        Ok(())
    }
}

/// Wrap `message` with an `authorization: Bearer <token>` header.
pub fn with_bearer<T>(message: T, token: &str) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    let value = MetadataValue::try_from(format!("Bearer {token}"))
        .expect("token is valid ASCII metadata");
    request.metadata_mut().insert("authorization", value);
    request
}
