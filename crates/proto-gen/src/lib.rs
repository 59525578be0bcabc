//! Wire types for the Concierge RPC surface.
//!
//! Messages are prost structs that also derive serde, so the HTTP gateway can
//! accept and emit the same shapes as JSON (camelCase field names). Client and
//! server stubs for `apiv1.Authenticator` are generated by `build.rs`.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)] // Generated code has various doc formatting

// Re-export prost traits for convenience
pub use prost::Message;

pub mod apiv1 {
    //! Authentication messages and the Authenticator service.

    use std::fmt;

    /// A namespaced identifier, e.g. a service account or a directory user.
    #[derive(Clone, PartialEq, Eq, Hash, ::prost::Message, ::serde::Serialize, ::serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Identifier {
        /// Namespace URI.
        #[prost(string, tag = "1")]
        pub system: ::prost::alloc::string::String,
        /// Value within the namespace.
        #[prost(string, tag = "2")]
        pub value: ::prost::alloc::string::String,
    }

    /// Login request. The password is redacted in Debug output.
    #[derive(Clone, PartialEq, ::prost::Message, ::serde::Serialize, ::serde::Deserialize)]
    #[prost(skip_debug)]
    #[serde(rename_all = "camelCase", default)]
    pub struct LoginRequest {
        #[prost(message, optional, tag = "1")]
        pub user: ::core::option::Option<Identifier>,
        #[prost(string, tag = "2")]
        pub password: ::prost::alloc::string::String,
    }

    impl fmt::Debug for LoginRequest {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("LoginRequest")
                .field("user", &self.user)
                .field("password", &"[REDACTED]")
                .finish()
        }
    }

    /// Token issued by Login or Refresh. Redacted in Debug output.
    #[derive(Clone, PartialEq, ::prost::Message, ::serde::Serialize, ::serde::Deserialize)]
    #[prost(skip_debug)]
    #[serde(rename_all = "camelCase", default)]
    pub struct LoginResponse {
        #[prost(string, tag = "1")]
        pub token: ::prost::alloc::string::String,
    }

    impl fmt::Debug for LoginResponse {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("LoginResponse")
                .field("token", &"[REDACTED]")
                .finish()
        }
    }

    /// Refresh uses the caller's token from metadata; the body is empty.
    #[derive(Clone, Copy, PartialEq, Eq, ::prost::Message, ::serde::Serialize, ::serde::Deserialize)]
    #[serde(default)]
    pub struct TokenRefreshRequest {}

    #[allow(
        clippy::all,
        clippy::pedantic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::indexing_slicing
    )]
    mod generated {
        include!(concat!(env!("OUT_DIR"), "/apiv1.Authenticator.rs"));
    }

    pub use generated::{authenticator_client, authenticator_server};
}
