//! Clock port for rate-limit windows.
//!
//! Windows are reported to callers as wall-clock reset times, so the clock
//! yields `DateTime<Utc>` rather than a monotonic `Instant`.

use std::fmt::Debug;

use chrono::{DateTime, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync + Debug {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// System clock implementation using `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock clock for unit tests.
///
/// All clones share the same underlying time, so advancing one clone
/// advances every holder.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct MockClock {
    current: std::sync::Arc<std::sync::Mutex<DateTime<Utc>>>,
}

#[cfg(test)]
impl MockClock {
    /// Create a mock clock starting at a specific time.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: std::sync::Arc::new(std::sync::Mutex::new(start)),
        }
    }

    /// Advance the clock by a number of milliseconds.
    pub fn advance_ms(&self, ms: i64) {
        let mut time = self
            .current
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        *time += chrono::Duration::milliseconds(ms);
    }

    /// Set the clock to a specific time.
    pub fn set(&self, at: DateTime<Utc>) {
        let mut time = self
            .current
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        *time = at;
    }
}

#[cfg(test)]
impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .current
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
    }
}
