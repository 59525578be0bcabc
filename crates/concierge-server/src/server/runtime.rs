//! Runtime lifecycle: listeners, concurrent serving loops and shutdown.
//!
//! The RPC loop and the gateway loop run as two supervised tasks sharing one
//! [`CancellationToken`]. Whichever happens first of a loop exiting or the
//! token being cancelled (termination signal, or the caller in
//! [`ServerRuntime::serve`]) shuts both down. The loops get
//! [`ServerOptions::shutdown_grace`] to drain before they are aborted.
//!
//! With a certificate configured, both listeners serve TLS from the same PEM
//! pair and the gateway dials the RPC listener over TLS.

use crate::auth::AuthProviderRegistry;
use crate::errors::{ProviderError, RegistrationError, ServerError};
use crate::grpc::health::{health_server, HEALTH_CHECK_PATH};
use crate::grpc::{rpc_trace_layer, AuthLayer, MethodPolicy};
use crate::server::gateway::{build_gateway, GatewayBackend};
use crate::server::provider::{Provider, RpcRegistrar};
use crate::server::tls::{serve_tls, tls_acceptor};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, ClientTlsConfig, Identity, Server, ServerTlsConfig};
use tracing::{debug, error, info, warn};

/// Default bounded drain period after shutdown is triggered.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default per-request timeout on the gateway.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Server name the gateway expects in the RPC listener's certificate.
pub const TLS_DOMAIN_NAME: &str = "localhost";

type LoopOutcome = (&'static str, Result<(), ServerError>);

/// TLS settings derived from one certificate/key pair.
struct TlsMaterial {
    rpc: ServerTlsConfig,
    backend: ClientTlsConfig,
    gateway: TlsAcceptor,
}

/// Listener and transport settings. Fixed once the runtime is built.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind_host: String,
    pub rpc_port: u16,
    pub rest_port: u16,
    /// PEM certificate for both listeners. Set together with `key_file`.
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub shutdown_grace: Duration,
    pub request_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            rpc_port: 9090,
            rest_port: 9091,
            cert_file: None,
            key_file: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ServerOptions {
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }
}

/// Owns the provider table and runs both protocol front-ends.
///
/// Build it, [`register`](Self::register) every provider, then call
/// [`run`](Self::run). The table is read-only once serving starts.
pub struct ServerRuntime {
    options: ServerOptions,
    auth: Option<Arc<AuthProviderRegistry>>,
    providers: BTreeMap<String, Arc<dyn Provider>>,
    metrics: Option<PrometheusHandle>,
}

impl fmt::Debug for ServerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRuntime")
            .field("options", &self.options)
            .field("auth_enabled", &self.auth.is_some())
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl ServerRuntime {
    /// `auth` of `None` runs without the auth layer.
    #[must_use]
    pub fn new(options: ServerOptions, auth: Option<Arc<AuthProviderRegistry>>) -> Self {
        Self {
            options,
            auth,
            providers: BTreeMap::new(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle` on the gateway.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    #[must_use]
    pub fn auth_enabled(&self) -> bool {
        self.auth.is_some()
    }

    #[must_use]
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Add a provider under a unique name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateProvider`] if the name is taken,
    /// or [`RegistrationError::EmptyName`].
    pub fn register(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) -> Result<(), RegistrationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if self.providers.contains_key(&name) {
            return Err(RegistrationError::DuplicateProvider(name));
        }
        info!(target: "concierge.server", provider = %name, "Registered provider");
        self.providers.insert(name, provider);
        Ok(())
    }

    /// Bind both listeners and serve until a termination signal or a loop failure.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if a port cannot be bound, a TLS error
    /// for bad certificate material, or the first error of either loop.
    pub async fn run(&self) -> Result<(), ServerError> {
        let rpc_listener = bind(&self.options.bind_host, self.options.rpc_port).await?;
        let http_listener = bind(&self.options.bind_host, self.options.rest_port).await?;

        let shutdown = CancellationToken::new();
        let signal_token = shutdown.clone();
        let signal_task = tokio::spawn(async move {
            tokio::select! {
                () = shutdown_signal() => {
                    info!(target: "concierge.server", "Termination signal received");
                    signal_token.cancel();
                }
                () = signal_token.cancelled() => {}
            }
        });

        let result = self.serve(rpc_listener, http_listener, shutdown).await;
        signal_task.abort();
        result
    }

    /// Serve on already-bound listeners until `shutdown` is cancelled or a loop exits.
    ///
    /// # Errors
    ///
    /// Returns a TLS or transport error raised before serving starts, or the
    /// first error of either loop.
    pub async fn serve(
        &self,
        rpc_listener: TcpListener,
        http_listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        let rpc_addr = local_addr(&rpc_listener)?;
        let http_addr = local_addr(&http_listener)?;

        let (server_tls, client_tls, gateway_tls) = match self.load_tls().await? {
            Some(tls) => (Some(tls.rpc), Some(tls.backend), Some(tls.gateway)),
            None => (None, None, None),
        };

        let mut registrar = RpcRegistrar::new();
        registrar.add_service(health_server(), &[HEALTH_CHECK_PATH]);
        for (name, provider) in &self.providers {
            debug!(target: "concierge.server", provider = %name, "Registering RPC services");
            provider.register_server(&mut registrar);
        }
        info!(
            target: "concierge.server",
            services = ?registrar.service_names(),
            "RPC services registered"
        );
        let (routes, unary) = registrar.into_parts();

        let layer = match &self.auth {
            Some(registry) => {
                AuthLayer::new(Arc::clone(registry.authority()), MethodPolicy::new(unary))
            }
            None => {
                warn!(target: "concierge.server", "Authentication disabled; every call is allowed");
                AuthLayer::disabled()
            }
        };

        let mut builder = Server::builder();
        if let Some(tls) = server_tls {
            builder = builder
                .tls_config(tls)
                .map_err(|e| ServerError::Tls(e.to_string()))?;
        }
        // Tracing wraps auth so rejected calls are logged too.
        let rpc_server = builder
            .layer(rpc_trace_layer())
            .layer(layer)
            .add_routes(routes);

        let backend = GatewayBackend::new(rpc_addr, client_tls)?;
        let gateway = build_gateway(
            &self.providers,
            &backend,
            self.metrics.clone(),
            self.options.request_timeout,
        );

        let mut tasks: JoinSet<LoopOutcome> = JoinSet::new();

        let stop = shutdown.clone();
        info!(
            target: "concierge.server",
            addr = %rpc_addr,
            tls = gateway_tls.is_some(),
            "RPC server starting"
        );
        spawn_loop(&mut tasks, "rpc", shutdown.clone(), async move {
            rpc_server
                .serve_with_incoming_shutdown(TcpListenerStream::new(rpc_listener), async move {
                    stop.cancelled().await;
                })
                .await
                .map_err(ServerError::from)
        });

        let stop = shutdown.clone();
        info!(
            target: "concierge.server",
            addr = %http_addr,
            tls = gateway_tls.is_some(),
            "HTTP gateway starting"
        );
        spawn_loop(&mut tasks, "gateway", shutdown.clone(), async move {
            match gateway_tls {
                Some(acceptor) => serve_tls(http_listener, gateway, acceptor, stop).await,
                None => axum::serve(http_listener, gateway)
                    .with_graceful_shutdown(async move {
                        stop.cancelled().await;
                    })
                    .await
                    .map_err(ServerError::Http),
            }
        });

        supervise(tasks, &shutdown, self.options.shutdown_grace).await
    }

    /// Close every provider, continuing past failures.
    ///
    /// # Errors
    ///
    /// Returns the first provider error encountered.
    pub async fn close(&self) -> Result<(), ProviderError> {
        let mut first_error = None;
        for (name, provider) in &self.providers {
            match provider.close().await {
                Ok(()) => debug!(target: "concierge.server", provider = %name, "Provider closed"),
                Err(e) => {
                    warn!(target: "concierge.server", provider = %name, error = %e, "Provider close failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn load_tls(&self) -> Result<Option<TlsMaterial>, ServerError> {
        let (cert_file, key_file) = match (&self.options.cert_file, &self.options.key_file) {
            (None, None) => return Ok(None),
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                return Err(ServerError::Tls(
                    "certificate and key files must be configured together".to_string(),
                ))
            }
        };

        let cert = read_pem(cert_file).await?;
        let key = read_pem(key_file).await?;
        let gateway = tls_acceptor(&cert, &key)?;
        info!(target: "concierge.server", cert_file = %cert_file.display(), "TLS enabled on both listeners");

        Ok(Some(TlsMaterial {
            rpc: ServerTlsConfig::new().identity(Identity::from_pem(&cert, &key)),
            backend: ClientTlsConfig::new()
                .ca_certificate(Certificate::from_pem(&cert))
                .domain_name(TLS_DOMAIN_NAME),
            gateway,
        }))
    }
}

async fn bind(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await.map_err(|source| {
        error!(target: "concierge.server", addr = %addr, error = %source, "Failed to bind listener");
        ServerError::Bind { addr: addr.clone(), source }
    })?;
    info!(target: "concierge.server", addr = %addr, "Listener bound");
    Ok(listener)
}

fn local_addr(listener: &TcpListener) -> Result<SocketAddr, ServerError> {
    listener.local_addr().map_err(|source| ServerError::Bind {
        addr: "pre-bound listener".to_string(),
        source,
    })
}

async fn read_pem(path: &Path) -> Result<Vec<u8>, ServerError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| ServerError::Tls(format!("failed to read {}: {e}", path.display())))
}

/// Run `serving` as a supervised loop. Its exit, for any reason, cancels
/// `shutdown` so the sibling loop stops too.
fn spawn_loop<F>(
    tasks: &mut JoinSet<LoopOutcome>,
    name: &'static str,
    shutdown: CancellationToken,
    serving: F,
) where
    F: Future<Output = Result<(), ServerError>> + Send + 'static,
{
    tasks.spawn(async move {
        let result = serving.await;
        shutdown.cancel();
        (name, result)
    });
}

/// Wait for `shutdown`, then give the loops `grace` to finish.
///
/// Returns the first loop error, if any.
async fn supervise(
    mut tasks: JoinSet<LoopOutcome>,
    shutdown: &CancellationToken,
    grace: Duration,
) -> Result<(), ServerError> {
    shutdown.cancelled().await;
    info!(
        target: "concierge.server",
        grace_ms = grace.as_millis(),
        "Shutting down"
    );

    let mut first_error = None;
    let drained = tokio::time::timeout(grace, drain(&mut tasks, &mut first_error)).await;
    if drained.is_err() {
        warn!(target: "concierge.server", "Grace period elapsed; aborting serving loops");
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }

    info!(target: "concierge.server", "Shutdown complete");
    first_error.map_or(Ok(()), Err)
}

async fn drain(tasks: &mut JoinSet<LoopOutcome>, first_error: &mut Option<ServerError>) {
    while let Some(joined) = tasks.join_next().await {
        let err = match joined {
            Ok((name, Ok(()))) => {
                debug!(target: "concierge.server", task = name, "Serving loop stopped");
                continue;
            }
            Ok((name, Err(e))) => {
                error!(target: "concierge.server", task = name, error = %e, "Serving loop failed");
                e
            }
            Err(e) => ServerError::Task(e.to_string()),
        };
        if first_error.is_none() {
            *first_error = Some(err);
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::server::gateway::GatewayScope;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProvider {
        closed: AtomicUsize,
        fail_close: bool,
    }

    #[async_trait]
    impl Provider for CountingProvider {
        fn register_server(&self, _registrar: &mut RpcRegistrar) {}

        fn register_http_proxy(
            &self,
            _scope: &mut GatewayScope,
            _backend: &GatewayBackend,
        ) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), ProviderError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(ProviderError::Close("connection pool busy".to_string()));
            }
            Ok(())
        }
    }

    fn local_options() -> ServerOptions {
        ServerOptions {
            bind_host: "127.0.0.1".to_string(),
            rpc_port: 0,
            rest_port: 0,
            shutdown_grace: Duration::from_secs(2),
            ..ServerOptions::default()
        }
    }

    #[test]
    fn test_register_rejects_duplicate_and_empty_names() {
        let mut runtime = ServerRuntime::new(local_options(), None);
        runtime
            .register("pix", Arc::new(CountingProvider::default()))
            .unwrap();

        assert_eq!(
            runtime.register("pix", Arc::new(CountingProvider::default())),
            Err(RegistrationError::DuplicateProvider("pix".to_string()))
        );
        assert_eq!(
            runtime.register("", Arc::new(CountingProvider::default())),
            Err(RegistrationError::EmptyName)
        );
        assert_eq!(runtime.provider_names(), vec!["pix"]);
    }

    #[tokio::test]
    async fn test_close_attempts_every_provider_and_returns_first_error() {
        let first = Arc::new(CountingProvider {
            fail_close: true,
            ..CountingProvider::default()
        });
        let second = Arc::new(CountingProvider {
            fail_close: true,
            ..CountingProvider::default()
        });
        let third = Arc::new(CountingProvider::default());

        let mut runtime = ServerRuntime::new(local_options(), None);
        runtime.register("a", first.clone()).unwrap();
        runtime.register("b", second.clone()).unwrap();
        runtime.register("c", third.clone()).unwrap();

        let result = runtime.close().await;
        assert!(matches!(result, Err(ProviderError::Close(_))));
        assert_eq!(first.closed.load(Ordering::SeqCst), 1);
        assert_eq!(second.closed.load(Ordering::SeqCst), 1);
        assert_eq!(third.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_half_configured_tls_is_fatal() {
        let options = ServerOptions {
            cert_file: Some(PathBuf::from("/nonexistent/cert.pem")),
            ..local_options()
        };
        let runtime = ServerRuntime::new(options, None);

        let rpc = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = runtime.serve(rpc, http, CancellationToken::new()).await;
        assert!(matches!(result, Err(ServerError::Tls(_))));
    }

    #[tokio::test]
    async fn test_missing_tls_files_are_fatal() {
        let options = ServerOptions {
            cert_file: Some(PathBuf::from("/nonexistent/cert.pem")),
            key_file: Some(PathBuf::from("/nonexistent/key.pem")),
            ..local_options()
        };
        let runtime = ServerRuntime::new(options, None);

        let rpc = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = runtime.serve(rpc, http, CancellationToken::new()).await;
        assert!(matches!(result, Err(ServerError::Tls(_))));
    }

    #[tokio::test]
    async fn test_serve_returns_ok_after_cancellation() {
        let runtime = ServerRuntime::new(local_options(), None);
        let rpc = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            runtime.serve(rpc, http, shutdown),
        )
        .await
        .expect("serve should stop within the grace period");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_failing_loop_cancels_sibling_and_is_reported() {
        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();

        let (stopped_tx, stopped_rx) = tokio::sync::oneshot::channel();
        let stop = shutdown.clone();
        spawn_loop(&mut tasks, "gateway", shutdown.clone(), async move {
            stop.cancelled().await;
            let _ = stopped_tx.send(());
            Ok(())
        });
        spawn_loop(&mut tasks, "rpc", shutdown.clone(), async {
            Err(ServerError::Task("listener closed".to_string()))
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            supervise(tasks, &shutdown, Duration::from_secs(2)),
        )
        .await
        .expect("supervise should return once the failed loop cancels the other");

        assert!(matches!(result, Err(ServerError::Task(message)) if message == "listener closed"));
        assert!(shutdown.is_cancelled());
        stopped_rx.await.expect("sibling loop should observe cancellation");
    }

    #[tokio::test]
    async fn test_hung_loop_is_aborted_after_grace() {
        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();
        spawn_loop(&mut tasks, "gateway", shutdown.clone(), async {
            std::future::pending::<()>().await;
            Ok(())
        });
        shutdown.cancel();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            supervise(tasks, &shutdown, Duration::from_millis(50)),
        )
        .await
        .expect("grace period should bound shutdown");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unusable_tls_material_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        let options = ServerOptions {
            cert_file: Some(cert),
            key_file: Some(key),
            ..local_options()
        };
        let runtime = ServerRuntime::new(options, None);

        let rpc = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = runtime.serve(rpc, http, CancellationToken::new()).await;
        assert!(matches!(result, Err(ServerError::Tls(_))));
    }

    #[tokio::test]
    async fn test_run_fails_when_port_is_taken() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let options = ServerOptions {
            rpc_port: port,
            ..local_options()
        };
        let runtime = ServerRuntime::new(options, None);
        let result = runtime.run().await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }
}
