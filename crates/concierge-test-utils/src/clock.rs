//! Manually advanced clock for expiry and refresh tests.

use chrono::{DateTime, TimeDelta, Utc};
use concierge_server::auth::Clock;
use std::sync::{Arc, Mutex};

/// A clock that only moves when told to.
///
/// # Example
/// ```rust,ignore
/// let clock = ManualClock::starting_now();
/// let authority = test_authority(1)?.with_clock(clock.clone());
/// clock.advance(TimeDelta::seconds(299));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    /// Start at the current wall-clock time, truncated to whole seconds
    /// since token claims carry second precision.
    pub fn starting_now() -> Arc<Self> {
        let now = Utc::now();
        let truncated = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        Self::new(truncated)
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
