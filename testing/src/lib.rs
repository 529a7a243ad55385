//! # Boxoffice Testing
//!
//! Testing utilities and fixtures for the Boxoffice platform.
//!
//! This crate provides:
//! - Deterministic clocks for driving lease and window logic
//! - Event window fixtures pinned relative to a test clock
//! - Proptest strategies for ledger inputs
//! - A tracing subscriber ready for `cargo test` output
//!
//! ## Example
//!
//! ```ignore
//! use boxoffice_testing::{ManualClock, test_clock};
//! use chrono::Duration;
//!
//! #[tokio::test]
//! async fn lease_expires() {
//!     let clock = Arc::new(ManualClock::new(test_clock().now()));
//!     let controller = AdmissionController::new(store, policy, clock.clone());
//!
//!     controller.join(&session, None).await?;
//!     clock.advance(Duration::minutes(16));
//!     let status = controller.check_status(&session).await?;
//!     assert!(!status.can_access());
//! }
//! ```

use chrono::{DateTime, Duration, Utc};

use boxoffice_core::clock::Clock;

/// Deterministic clocks for tests.
///
/// Production code reads time through [`Clock`]; these implementations pin
/// or steer it so deadline logic runs without sleeping.
pub mod mocks {
    use std::sync::Mutex;

    use super::{Clock, DateTime, Duration, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use boxoffice_testing::mocks::FixedClock;
    /// use boxoffice_core::clock::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that tests move by hand.
    ///
    /// Starts at a given instant and stays there until `advance` or `set`
    /// is called, so lease expiry paths run without real sleeps.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a manual clock starting at the given time
        #[must_use]
        pub const fn new(start: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(start),
            }
        }

        /// Move the clock forward
        ///
        /// # Panics
        ///
        /// Panics if a previous holder of the clock panicked mid-update,
        /// which cannot happen outside the test that poisoned it.
        #[allow(clippy::expect_used)]
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().expect("clock mutex poisoned");
            *time += by;
        }

        /// Jump the clock to an exact instant
        ///
        /// # Panics
        ///
        /// Panics if a previous holder of the clock panicked mid-update.
        #[allow(clippy::expect_used)]
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().expect("clock mutex poisoned") = to;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::expect_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().expect("clock mutex poisoned")
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Event fixtures pinned relative to a test clock.
///
/// Reservations are allowed strictly before `starts_at`, so the fixture
/// names describe the event, not the window: an upcoming event is
/// purchasable, a started or ended one is not.
pub mod fixtures {
    use boxoffice_core::types::Money;

    use super::{DateTime, Duration, Utc};

    /// Sale window for an event that has not started: purchasable at `now`
    #[must_use]
    pub fn upcoming_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now + Duration::hours(2), now + Duration::hours(5))
    }

    /// Window for an event already under way
    #[must_use]
    pub fn started_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - Duration::hours(1), now + Duration::hours(2))
    }

    /// Window for an event that has already finished
    #[must_use]
    pub fn ended_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - Duration::hours(5), now - Duration::hours(2))
    }

    /// Standard test ticket price
    #[must_use]
    pub const fn standard_price() -> Money {
        Money::from_cents(4_500)
    }
}

/// Test helpers and utilities
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a compact tracing subscriber for the current test binary.
    ///
    /// Safe to call from every test; only the first call installs, later
    /// calls are no-ops.
    pub fn init_test_logging() {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }
}

/// Proptest strategies for ledger inputs.
///
/// Strategies compose into property tests the way fixtures compose into
/// example tests. Windows are generated open at a chosen instant, so every
/// case starts from a purchasable event.
pub mod properties {
    use boxoffice_core::types::Money;
    use proptest::prelude::Strategy;

    use super::{DateTime, Duration, Utc};

    /// Sale windows open for purchase at `anchor`.
    ///
    /// The window starts between one minute and three days after `anchor`
    /// and stays open for thirty minutes to six hours.
    #[must_use]
    pub fn open_window(
        anchor: DateTime<Utc>,
    ) -> impl Strategy<Value = (DateTime<Utc>, DateTime<Utc>)> {
        (1i64..=4_320, 30i64..=360).prop_map(move |(lead, length)| {
            let starts_at = anchor + Duration::minutes(lead);
            (starts_at, starts_at + Duration::minutes(length))
        })
    }

    /// Allocations small enough for a test to sell out
    #[must_use]
    pub fn capacity() -> impl Strategy<Value = u32> {
        1u32..=50
    }

    /// Ticket prices in whole cents
    #[must_use]
    pub fn price() -> impl Strategy<Value = Money> {
        (100u64..=100_000).prop_map(Money::from_cents)
    }
}

// Re-export commonly used items
pub use helpers::init_test_logging;
pub use mocks::{FixedClock, ManualClock, test_clock};
