//! Time source for token issue and expiry.

use chrono::{DateTime, Utc};
use std::fmt;

/// Source of the current time.
///
/// Token lifetimes and refresh windows are evaluated against this, so tests
/// can freeze or advance time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
