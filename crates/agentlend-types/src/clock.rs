//! Time source for the lending engine
//!
//! The engine never polls or schedules; it only asks the clock for "now" when a
//! caller invokes an operation.
//!
//! `ManualClock` is a test fixture, compiled only with the `test-util`
//! feature.

use chrono::{DateTime, Utc};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "test-util"))]
mod manual {
    use super::Clock;
    use chrono::{DateTime, Duration, Utc};
    use std::fmt;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    /// Clock that only moves when told to; for tests
    ///
    /// Clones share the same instant, so a test can hand one clone to the engine
    /// and keep another to advance time.
    #[derive(Clone)]
    pub struct ManualClock {
        millis: Arc<AtomicI64>,
    }

    impl ManualClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
            }
        }

        /// Start at the current wall-clock time
        pub fn starting_now() -> Self {
            Self::new(Utc::now())
        }

        pub fn set(&self, instant: DateTime<Utc>) {
            self.millis.store(instant.timestamp_millis(), Ordering::SeqCst);
        }

        pub fn advance(&self, by: Duration) {
            self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
        }

        pub fn advance_days(&self, days: i64) {
            self.advance(Duration::days(days));
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
        }
    }

    impl fmt::Debug for ManualClock {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("ManualClock").field("now", &self.now()).finish()
        }
    }
}
