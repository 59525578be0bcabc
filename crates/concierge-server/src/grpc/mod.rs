//! RPC front-end pieces installed by the runtime.
//!
//! - `auth_layer` - per-call bearer token enforcement (tower layer)
//! - `health` - `grpc.health.v1.Health`, always SERVING
//! - `logging` - per-call span and outcome logging (tower-http trace)

pub mod auth_layer;
pub mod health;
pub mod logging;

pub use auth_layer::{AuthLayer, AuthService, MethodPolicy, LOGIN_PATH, REFRESH_PATH};
pub use health::{health_server, HealthService};
pub use logging::{rpc_trace_layer, RpcTraceLayer};
