//! Where the logic gets the time from.

use chrono::{DateTime, Utc};

/// A source of the current time. Token expiry is judged against this, so tests can move time
/// forward without sleeping.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system's wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
