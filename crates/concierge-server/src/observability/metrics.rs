//! Metrics definitions for the Concierge server.
//!
//! All metrics follow Prometheus naming conventions:
//! - `concierge_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `namespace_class`: 2 values (service, delegated)
//! - `status`: 2 values (success, error)
//! - `reason`: 2 values (login, refresh)
//! - `error_category`: bounded by code (malformed, signature, expired, none)

use metrics::counter;

/// Label value for service-account namespaces.
pub const SERVICE_CLASS: &str = "service";

/// Label value for delegated-user namespaces.
pub const DELEGATED_CLASS: &str = "delegated";

/// Record a login attempt outcome
///
/// Metric: `concierge_login_total`
/// Labels: `namespace_class`, `status`
pub fn record_login(namespace_class: &str, status: &str) {
    counter!("concierge_login_total", "namespace_class" => namespace_class.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Record a token minted by login or refresh
///
/// Metric: `concierge_token_issued_total`
/// Labels: `namespace_class`, `reason`
pub fn record_token_issued(namespace_class: &str, reason: &str) {
    counter!("concierge_token_issued_total", "namespace_class" => namespace_class.to_string(), "reason" => reason.to_string())
        .increment(1);
}

/// Record token validation result
///
/// Metric: `concierge_token_validations_total`
/// Labels: `status`, `error_category`
pub fn record_token_validation(status: &str, error_category: Option<&str>) {
    let category = error_category.unwrap_or("none");
    counter!("concierge_token_validations_total", "status" => status.to_string(), "error_category" => category.to_string())
        .increment(1);
}

/// Record a provider's gateway registration outcome
///
/// Metric: `concierge_gateway_registrations_total`
/// Labels: `status`
pub fn record_gateway_registration(status: &str) {
    counter!("concierge_gateway_registrations_total", "status" => status.to_string()).increment(1);
}
