//! Standard gRPC health service.
//!
//! `Check` reports SERVING unconditionally; `Watch` is not supported.

use std::pin::Pin;
use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_server::{Health, HealthServer};
use tonic_health::pb::{HealthCheckRequest, HealthCheckResponse};

/// Unary health check, reachable without a token.
pub const HEALTH_CHECK_PATH: &str = "/grpc.health.v1.Health/Check";

/// Streaming health watch.
pub const HEALTH_WATCH_PATH: &str = "/grpc.health.v1.Health/Watch";

#[derive(Debug, Default, Clone, Copy)]
pub struct HealthService;

#[tonic::async_trait]
impl Health for HealthService {
    async fn check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        Ok(Response::new(HealthCheckResponse {
            status: ServingStatus::Serving as i32,
        }))
    }

    type WatchStream =
        Pin<Box<dyn Stream<Item = Result<HealthCheckResponse, Status>> + Send + 'static>>;

    async fn watch(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        Err(Status::unimplemented("health watch is not supported"))
    }
}

/// Health service ready to register on the RPC listener.
#[must_use]
pub fn health_server() -> HealthServer<HealthService> {
    HealthServer::new(HealthService)
}
