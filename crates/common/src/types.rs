//! Principal identity.
//!
//! An [`Identity`] names who is being authenticated: a value scoped by a
//! namespace URI. Tokens carry it as a single subject string,
//! `"<namespace>|<value>"`, so neither half may contain the separator.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Separator between namespace and value in a token subject.
pub const SUBJECT_SEPARATOR: char = '|';

/// Reasons an identity cannot be constructed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity namespace must not be empty")]
    EmptyNamespace,

    #[error("identity value must not be empty")]
    EmptyValue,

    #[error("identity must not contain '{SUBJECT_SEPARATOR}'")]
    ContainsSeparator,

    #[error("subject must be '<namespace>{SUBJECT_SEPARATOR}<value>'")]
    MalformedSubject,
}

/// A principal uniquely identified within its namespace.
///
/// Immutable once constructed; the fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawIdentity", into = "RawIdentity")]
pub struct Identity {
    namespace: String,
    value: String,
}

impl Identity {
    /// Creates an identity, rejecting empty parts and embedded separators.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if either part is empty or contains
    /// [`SUBJECT_SEPARATOR`].
    pub fn new(namespace: impl Into<String>, value: impl Into<String>) -> Result<Self, IdentityError> {
        let namespace = namespace.into();
        let value = value.into();

        if namespace.is_empty() {
            return Err(IdentityError::EmptyNamespace);
        }
        if value.is_empty() {
            return Err(IdentityError::EmptyValue);
        }
        if namespace.contains(SUBJECT_SEPARATOR) || value.contains(SUBJECT_SEPARATOR) {
            return Err(IdentityError::ContainsSeparator);
        }

        Ok(Self { namespace, value })
    }

    /// Parses a token subject. It must split into exactly two non-empty parts.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MalformedSubject`] otherwise.
    pub fn from_subject(subject: &str) -> Result<Self, IdentityError> {
        let mut parts = subject.split(SUBJECT_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(value), None) if !namespace.is_empty() && !value.is_empty() => {
                Ok(Self {
                    namespace: namespace.to_string(),
                    value: value.to_string(),
                })
            }
            _ => Err(IdentityError::MalformedSubject),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The token subject for this identity.
    #[must_use]
    pub fn subject(&self) -> String {
        format!("{}{SUBJECT_SEPARATOR}{}", self.namespace, self.value)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SUBJECT_SEPARATOR}{}", self.namespace, self.value)
    }
}

#[derive(Serialize, Deserialize)]
struct RawIdentity {
    namespace: String,
    value: String,
}

impl TryFrom<RawIdentity> for Identity {
    type Error = IdentityError;

    fn try_from(raw: RawIdentity) -> Result<Self, Self::Error> {
        Identity::new(raw.namespace, raw.value)
    }
}

impl From<Identity> for RawIdentity {
    fn from(identity: Identity) -> Self {
        RawIdentity {
            namespace: identity.namespace,
            value: identity.value,
        }
    }
}
