//! Clock abstraction used for freshness decisions.
//!
//! All freshness checks go through a [`TimeProvider`] so tests can move time
//! forward without sleeping. Production code uses [`SystemTimeProvider`].

use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Source of the current time.
pub trait TimeProvider: Debug + Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

impl<T: TimeProvider + ?Sized> TimeProvider for Arc<T> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(feature = "test-helpers")]
pub use mock::MockTimeProvider;

#[cfg(feature = "test-helpers")]
mod mock {
    use std::sync::{Arc, RwLock};

    use chrono::{DateTime, Duration, Utc};

    use super::TimeProvider;

    /// Manually advanced clock for tests.
    ///
    /// Clones share the same underlying time.
    #[derive(Debug, Clone)]
    pub struct MockTimeProvider {
        start: DateTime<Utc>,
        now: Arc<RwLock<DateTime<Utc>>>,
    }

    impl MockTimeProvider {
        /// Creates a clock frozen at the current wall time.
        pub fn new() -> Self {
            Self::at(Utc::now())
        }

        /// Creates a clock frozen at `start`.
        pub fn at(start: DateTime<Utc>) -> Self {
            Self {
                start,
                now: Arc::new(RwLock::new(start)),
            }
        }

        /// Moves the clock forward.
        pub fn advance(&self, by: std::time::Duration) {
            let by = Duration::from_std(by).expect("duration out of range");
            let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
            *now = *now + by;
        }

        /// Moves the clock forward by whole seconds.
        pub fn advance_secs(&self, secs: u64) {
            self.advance(std::time::Duration::from_secs(secs));
        }

        /// Time elapsed since the clock was created.
        pub fn elapsed(&self) -> Duration {
            self.now() - self.start
        }
    }

    impl Default for MockTimeProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TimeProvider for MockTimeProvider {
        fn now(&self) -> DateTime<Utc> {
            *self.now.read().unwrap_or_else(|e| e.into_inner())
        }
    }
}
