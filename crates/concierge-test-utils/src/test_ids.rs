//! Fixed identities and credentials used across tests.

use proto_gen::apiv1::{Identifier, LoginRequest};

/// Service-account namespace.
pub const SERVICE_NAMESPACE: &str = "svc";
pub const SERVICE_ACCOUNT: &str = "acct-1";
pub const SERVICE_SECRET: &str = "s3cr3t";

/// Delegated-user namespace.
pub const DIRECTORY_NAMESPACE: &str = "directory-user";
pub const DIRECTORY_USER: &str = "alice";
pub const DIRECTORY_PASSWORD: &str = "pw";

/// Token subject for the test service account.
pub fn service_subject() -> String {
    format!("{SERVICE_NAMESPACE}|{SERVICE_ACCOUNT}")
}

/// Token subject for the test directory user.
pub fn directory_subject() -> String {
    format!("{DIRECTORY_NAMESPACE}|{DIRECTORY_USER}")
}

pub fn login_request(system: &str, value: &str, password: &str) -> LoginRequest {
    LoginRequest {
        user: Some(Identifier {
            system: system.to_string(),
            value: value.to_string(),
        }),
        password: password.to_string(),
    }
}

pub fn service_login_request() -> LoginRequest {
    login_request(SERVICE_NAMESPACE, SERVICE_ACCOUNT, SERVICE_SECRET)
}

pub fn directory_login_request() -> LoginRequest {
    login_request(DIRECTORY_NAMESPACE, DIRECTORY_USER, DIRECTORY_PASSWORD)
}
