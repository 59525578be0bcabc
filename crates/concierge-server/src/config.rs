//! Concierge configuration.
//!
//! Loaded from environment variables by the binary. Sensitive fields are
//! redacted in Debug output.

use crate::server::ServerOptions;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default interface for both listeners.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default RPC port.
pub const DEFAULT_RPC_PORT: u16 = 9090;

/// Default HTTP gateway port.
pub const DEFAULT_REST_PORT: u16 = 9091;

/// Default service-account namespace.
pub const DEFAULT_SERVICE_NAMESPACE: &str = "https://concierge.eldrix.com/Id/service-user";

/// Default drain period in seconds.
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 5;

#[derive(Clone)]
pub struct Config {
    /// Interface for both listeners (default: "0.0.0.0").
    pub bind_host: String,

    pub rpc_port: u16,

    pub rest_port: u16,

    /// TLS certificate and key for the RPC listener; both or neither.
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,

    /// PEM PKCS#8 Ed25519 signing key. Unset means an ephemeral key.
    pub jwt_key_file: Option<PathBuf>,

    pub auth_disabled: bool,

    pub service_namespace: String,

    /// Bcrypt hash of the service-account secret.
    /// Protected by `SecretString` to prevent accidental logging.
    pub service_account_hash: Option<SecretString>,

    pub shutdown_grace_seconds: u64,

    pub log_json: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_host", &self.bind_host)
            .field("rpc_port", &self.rpc_port)
            .field("rest_port", &self.rest_port)
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("jwt_key_file", &self.jwt_key_file)
            .field("auth_disabled", &self.auth_disabled)
            .field("service_namespace", &self.service_namespace)
            .field(
                "service_account_hash",
                &self.service_account_hash.as_ref().map(|_| "[REDACTED]"),
            )
            .field("shutdown_grace_seconds", &self.shutdown_grace_seconds)
            .field("log_json", &self.log_json)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
    }
}

fn parse_bool(vars: &HashMap<String, String>, name: &str) -> Result<bool, ConfigError> {
    match vars.get(name).map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("" | "false" | "0" | "no") => Ok(false),
        Some("true" | "1" | "yes") => Ok(true),
        Some(other) => Err(ConfigError::InvalidValue(format!("{name}={other}"))),
    }
}

fn non_empty(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_host =
            non_empty(vars, "CONCIERGE_BIND_HOST").unwrap_or_else(|| DEFAULT_BIND_HOST.to_string());
        let rpc_port = parse_var(vars, "CONCIERGE_RPC_PORT", DEFAULT_RPC_PORT)?;
        let rest_port = parse_var(vars, "CONCIERGE_REST_PORT", DEFAULT_REST_PORT)?;

        let cert_file = non_empty(vars, "CONCIERGE_CERT_FILE").map(PathBuf::from);
        let key_file = non_empty(vars, "CONCIERGE_KEY_FILE").map(PathBuf::from);
        match (&cert_file, &key_file) {
            (Some(_), None) => {
                return Err(ConfigError::MissingEnvVar("CONCIERGE_KEY_FILE".to_string()))
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingEnvVar("CONCIERGE_CERT_FILE".to_string()))
            }
            _ => {}
        }

        let jwt_key_file = non_empty(vars, "CONCIERGE_JWT_KEY_FILE").map(PathBuf::from);
        let auth_disabled = parse_bool(vars, "CONCIERGE_AUTH_DISABLED")?;
        let service_namespace = non_empty(vars, "CONCIERGE_SERVICE_NAMESPACE")
            .unwrap_or_else(|| DEFAULT_SERVICE_NAMESPACE.to_string());
        let service_account_hash =
            non_empty(vars, "CONCIERGE_SERVICE_ACCOUNT_HASH").map(SecretString::from);
        let shutdown_grace_seconds = parse_var(
            vars,
            "CONCIERGE_SHUTDOWN_GRACE_SECONDS",
            DEFAULT_SHUTDOWN_GRACE_SECONDS,
        )?;
        let log_json = parse_bool(vars, "CONCIERGE_LOG_JSON")?;

        Ok(Config {
            bind_host,
            rpc_port,
            rest_port,
            cert_file,
            key_file,
            jwt_key_file,
            auth_disabled,
            service_namespace,
            service_account_hash,
            shutdown_grace_seconds,
            log_json,
        })
    }

    /// Listener settings for [`crate::server::ServerRuntime`].
    #[must_use]
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            bind_host: self.bind_host.clone(),
            rpc_port: self.rpc_port,
            rest_port: self.rest_port,
            cert_file: self.cert_file.clone(),
            key_file: self.key_file.clone(),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_seconds),
            ..ServerOptions::default()
        }
    }
}
