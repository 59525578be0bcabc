//! Concierge
//!
//! Authenticated dual-protocol runtime for backend connector modules.
//!
//! # Servers
//!
//! - RPC listener (default: 0.0.0.0:9090), optionally TLS
//! - HTTP/JSON gateway proxying to the RPC listener, plus `/health` and
//!   `/metrics` (default: 0.0.0.0:9091)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Load the signing key (or generate an ephemeral one)
//! 4. Register the service-account namespace and the Authenticator
//! 5. Serve until SIGTERM/Ctrl+C, then close providers
//!
//! `concierge generate-credentials` prints a new service-account secret and
//! the bcrypt hash to configure as `CONCIERGE_SERVICE_ACCOUNT_HASH`.

#![warn(clippy::pedantic)]

use common::secret::ExposeSecret;
use concierge_server::auth::{
    generate_credentials, AuthProviderRegistry, AuthenticatorService, BcryptAuthProvider,
    TokenAuthority,
};
use concierge_server::config::Config;
use concierge_server::server::ServerRuntime;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const GENERATE_CREDENTIALS_COMMAND: &str = "generate-credentials";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::args().nth(1).as_deref() == Some(GENERATE_CREDENTIALS_COMMAND) {
        let (secret, hash) = generate_credentials()?;
        println!("secret: {}", secret.expose_secret());
        println!("hash:   {hash}");
        return Ok(());
    }

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "concierge_server=info,tower_http=info".into());
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Concierge");
    info!(
        bind_host = %config.bind_host,
        rpc_port = config.rpc_port,
        rest_port = config.rest_port,
        tls = config.cert_file.is_some(),
        auth_disabled = config.auth_disabled,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder before any metrics are recorded
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        format!("Failed to install Prometheus metrics recorder: {e}")
    })?;

    let auth = if config.auth_disabled {
        warn!("Authentication is disabled; every RPC call is allowed");
        None
    } else {
        Some(Arc::new(build_registry(&config)?))
    };

    let mut runtime =
        ServerRuntime::new(config.server_options(), auth.clone()).with_metrics(prometheus_handle);
    if let Some(registry) = auth {
        runtime
            .register("auth", Arc::new(AuthenticatorService::new(registry)))
            .map_err(|e| {
                error!(error = %e, "Provider registration failed");
                e
            })?;
    }

    let result = runtime.run().await;

    if let Err(e) = runtime.close().await {
        warn!(error = %e, "Provider close error");
    }

    match result {
        Ok(()) => {
            info!("Concierge shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Concierge stopped with error");
            Err(e.into())
        }
    }
}

fn build_registry(config: &Config) -> Result<AuthProviderRegistry, Box<dyn std::error::Error>> {
    let authority = match &config.jwt_key_file {
        Some(path) => {
            let authority = TokenAuthority::from_key_file(path).map_err(|e| {
                error!(error = %e, "Failed to load signing key");
                e
            })?;
            info!(key_file = %path.display(), "Signing key loaded");
            authority
        }
        None => {
            warn!("No signing key configured; using an ephemeral key. Tokens will not survive a restart");
            TokenAuthority::ephemeral()?
        }
    };

    let mut registry = AuthProviderRegistry::new(Arc::new(authority));
    match &config.service_account_hash {
        Some(hash) => {
            registry
                .register_auth_provider(
                    config.service_namespace.clone(),
                    "service-account",
                    Arc::new(BcryptAuthProvider::new(hash.clone())),
                    true,
                )
                .map_err(|e| {
                    error!(error = %e, "Auth provider registration failed");
                    e
                })?;
        }
        None => {
            warn!(
                namespace = %config.service_namespace,
                "No service-account hash configured; service-account login is unavailable"
            );
        }
    }
    Ok(registry)
}
