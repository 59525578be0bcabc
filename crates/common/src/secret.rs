//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports [`secrecy`]. Credentials presented at login, bcrypt hashes and
//! raw bearer tokens are carried as [`SecretString`] so that deriving `Debug`
//! on any struct holding them stays safe for `tracing` output.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Credential {
//!     account: String,
//!     secret: SecretString,
//! }
//!
//! let credential = Credential {
//!     account: "acct-1".to_string(),
//!     secret: SecretString::from("s3cr3t"),
//! };
//!
//! assert!(!format!("{credential:?}").contains("s3cr3t"));
//! assert_eq!(credential.secret.expose_secret(), "s3cr3t");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
