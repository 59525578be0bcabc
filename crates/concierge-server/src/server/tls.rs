//! HTTPS for the gateway listener.
//!
//! When the runtime has a certificate, the gateway terminates TLS itself with
//! the same PEM pair as the RPC listener. Connections are served by hyper's
//! auto (HTTP/1.1 or HTTP/2) builder and drained gracefully on shutdown.

use crate::errors::ServerError;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// TLS acceptor for a PEM certificate chain and private key.
///
/// # Errors
///
/// Returns [`ServerError::Tls`] if either PEM document is unusable or rustls
/// refuses the pair.
pub fn tls_acceptor(cert_pem: &[u8], key_pem: &[u8]) -> Result<TlsAcceptor, ServerError> {
    let certs = CertificateDer::pem_slice_iter(cert_pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("invalid certificate: {e}")))?;
    if certs.is_empty() {
        return Err(ServerError::Tls("no certificate in PEM file".to_string()));
    }
    let key = PrivateKeyDer::from_pem_slice(key_pem)
        .map_err(|e| ServerError::Tls(format!("invalid private key: {e}")))?;

    let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ServerError::Tls(e.to_string()))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| ServerError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Serve `router` over TLS until `shutdown` is cancelled.
///
/// Accept failures and failed handshakes are logged and skipped. Open
/// connections are asked to finish their in-flight requests once shutdown
/// begins.
///
/// # Errors
///
/// Currently never fails; the signature matches the plain HTTP loop.
pub async fn serve_tls(
    listener: TcpListener,
    router: Router,
    acceptor: TlsAcceptor,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let mut connections = JoinSet::new();

    loop {
        let (stream, peer) = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(target: "concierge.gateway", error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };
        while connections.try_join_next().is_some() {}

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(router.clone());
        let shutdown = shutdown.clone();
        connections.spawn(async move {
            let tls = tokio::select! {
                () = shutdown.cancelled() => return,
                handshake = acceptor.accept(stream) => match handshake {
                    Ok(tls) => tls,
                    Err(e) => {
                        debug!(target: "concierge.gateway", peer = %peer, error = %e, "TLS handshake failed");
                        return;
                    }
                },
            };

            let builder = auto::Builder::new(TokioExecutor::new());
            let connection = builder.serve_connection(TokioIo::new(tls), service);
            tokio::pin!(connection);

            let result = tokio::select! {
                result = connection.as_mut() => result,
                () = shutdown.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };
            if let Err(e) = result {
                debug!(target: "concierge.gateway", peer = %peer, error = %e, "Connection closed with error");
            }
        });
    }

    while connections.join_next().await.is_some() {}
    Ok(())
}
