//! Injected time source.
//!
//! All grace arithmetic in the store compares timestamps obtained from a
//! [`Clock`]. Production code uses [`SystemClock`]; tests and
//! deterministic simulations drive a [`ManualClock`].

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Supplies the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually advanced clock.
///
/// Starts at a fixed instant and only moves when told to, which makes
/// grace-period transitions reproducible in tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at the given instant.
    #[must_use]
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Creates a clock frozen at the Unix epoch.
    #[must_use]
    pub fn at_epoch() -> Self {
        Self::starting_at(DateTime::UNIX_EPOCH)
    }

    /// Advances the clock by a duration.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned (test-only type).
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("manual clock poisoned");
        *now = *now + by;
    }

    /// Jumps the clock to an absolute instant.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned (test-only type).
    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().expect("manual clock poisoned");
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("manual clock poisoned")
    }
}
