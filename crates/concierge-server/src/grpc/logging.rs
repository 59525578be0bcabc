//! Per-call logging for the RPC listener.
//!
//! Every call gets an `rpc` span carrying the method path, the peer address
//! and the `x-forwarded-host` the gateway attaches. The outcome is logged
//! when the call ends: a non-OK `grpc-status` as a warning, success at info.

use crate::server::gateway::FORWARDED_HOST;
use axum::http;
use std::net::SocketAddr;
use tonic::transport::server::{TcpConnectInfo, TlsConnectInfo};
use tower_http::trace::{
    DefaultOnEos, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, GrpcMakeClassifier,
    MakeSpan, TraceLayer,
};
use tracing::{Level, Span};

/// Tower layer logging each RPC with its outcome.
pub type RpcTraceLayer = TraceLayer<GrpcMakeClassifier, RpcMakeSpan>;

/// Builds the `rpc` span for a call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcMakeSpan;

impl<B> MakeSpan<B> for RpcMakeSpan {
    fn make_span(&mut self, request: &http::Request<B>) -> Span {
        let peer = peer_addr(request).map_or_else(|| "unknown".to_string(), |a| a.to_string());
        tracing::info_span!(
            target: "concierge.grpc",
            "rpc",
            method = %request.uri().path(),
            peer = %peer,
            forwarded_host = forwarded_host(request).unwrap_or("-"),
        )
    }
}

#[must_use]
pub fn rpc_trace_layer() -> RpcTraceLayer {
    TraceLayer::new_for_grpc()
        .make_span_with(RpcMakeSpan)
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG))
        .on_eos(DefaultOnEos::new().level(Level::INFO))
        .on_failure(DefaultOnFailure::new().level(Level::WARN))
}

/// Remote address of the connection the call arrived on.
pub fn peer_addr<B>(request: &http::Request<B>) -> Option<SocketAddr> {
    let extensions = request.extensions();
    extensions
        .get::<TcpConnectInfo>()
        .and_then(TcpConnectInfo::remote_addr)
        .or_else(|| {
            extensions
                .get::<TlsConnectInfo<TcpConnectInfo>>()
                .and_then(|info| info.get_ref().remote_addr())
        })
}

/// Host the HTTP client addressed, when the call came through the gateway.
pub fn forwarded_host<B>(request: &http::Request<B>) -> Option<&str> {
    request
        .headers()
        .get(FORWARDED_HOST)
        .and_then(|value| value.to_str().ok())
}
