//! Time as an injected dependency.
//!
//! Every timestamp in this crate flows through a [`Clock`] so lease expiry
//! and purchase windows are deterministic under test. Backends never use
//! database `NOW()`; the decision-time instant is always a bind parameter.

use chrono::{DateTime, Utc};

/// Provides the current time
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation for production use
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
