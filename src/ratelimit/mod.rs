//! Per-agent fixed-window rate limiting.
//!
//! Each agent gets a counter and a window end time. The first request after
//! the window has ended starts a new window with a count of one; requests
//! inside an active window increment the count until it reaches the limit,
//! after which they are denied without incrementing.
//!
//! # Fixed Window Tradeoff
//!
//! The window is fixed, not sliding. An agent can spend its whole limit
//! just before a window ends and again just after, so up to `2 × limit`
//! requests may be admitted in a short span around a boundary.
//!
//! # Concurrency
//!
//! State lives in a `DashMap`. The check-and-increment for one agent runs
//! under that map's entry lock, which is scoped to the shard holding the
//! key, so concurrent calls for the same agent never over- or under-count
//! and calls for unrelated agents do not contend on a global lock. State is
//! process-local; separate proxy instances keep separate counters.

mod clock;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;

pub use clock::{Clock, SystemClock};

#[cfg(test)]
pub use clock::MockClock;

use crate::store::AgentId;

/// Default window length (one minute)
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowState {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests counted in the current window
    pub current_count: u32,
    /// Limit the request was checked against
    pub limit: u32,
    /// When the window resets; set on denial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<DateTime<Utc>>,
}

/// Fixed-window request counter keyed by agent id
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<AgentId, WindowState>,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Create a limiter on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a limiter on a specific clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Count a request for `agent_id` against `limit` per `window_ms`.
    pub fn check(&self, agent_id: AgentId, limit: u32, window_ms: u64) -> RateLimitResult {
        let now = self.clock.now();
        let window = Duration::milliseconds(i64::try_from(window_ms).unwrap_or(i64::MAX));

        let mut entry = self.windows.entry(agent_id).or_insert(WindowState {
            count: 0,
            reset_at: now,
        });
        let state = entry.value_mut();

        if now >= state.reset_at {
            *state = WindowState {
                count: 1,
                reset_at: now
                    .checked_add_signed(window)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            };
            return RateLimitResult {
                allowed: true,
                current_count: 1,
                limit,
                reset_time: None,
            };
        }

        if state.count >= limit {
            return RateLimitResult {
                allowed: false,
                current_count: state.count,
                limit,
                reset_time: Some(state.reset_at),
            };
        }

        state.count += 1;
        RateLimitResult {
            allowed: true,
            current_count: state.count,
            limit,
            reset_time: None,
        }
    }

    /// [`RateLimiter::check`] with [`DEFAULT_WINDOW_MS`]
    pub fn check_default(&self, agent_id: AgentId, limit: u32) -> RateLimitResult {
        self.check(agent_id, limit, DEFAULT_WINDOW_MS)
    }

    /// Drop windows that have already ended. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, state| now < state.reset_at);
        before - self.windows.len()
    }

    /// Forget one agent's window
    pub fn reset_agent(&self, agent_id: AgentId) {
        self.windows.remove(&agent_id);
    }

    /// Forget all windows
    pub fn reset(&self) {
        self.windows.clear();
    }

    /// Number of tracked agents
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn limiter_at_epoch() -> (RateLimiter, MockClock) {
        let clock = MockClock::new(Utc.timestamp_millis_opt(0).unwrap());
        (RateLimiter::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_fixed_window_sequence() {
        let (limiter, clock) = limiter_at_epoch();

        let mut outcomes = Vec::new();
        for _ in 0..4 {
            outcomes.push(limiter.check(7, 3, 1000).allowed);
            clock.advance_ms(1);
        }
        assert_eq!(outcomes, vec![true, true, true, false]);

        clock.set(Utc.timestamp_millis_opt(1001).unwrap());
        let after = limiter.check(7, 3, 1000);
        assert!(after.allowed);
        assert_eq!(after.current_count, 1);
    }

    #[test]
    fn test_denial_reports_reset_time_and_does_not_increment() {
        let (limiter, clock) = limiter_at_epoch();

        limiter.check(1, 1, 1000);
        clock.advance_ms(10);
        let denied = limiter.check(1, 1, 1000);
        let denied_again = limiter.check(1, 1, 1000);

        assert!(!denied.allowed);
        assert_eq!(denied.current_count, 1);
        assert_eq!(denied_again.current_count, 1);
        assert_eq!(denied.reset_time, Some(Utc.timestamp_millis_opt(1000).unwrap()));
    }

    #[test]
    fn test_window_resets_exactly_at_boundary() {
        let (limiter, clock) = limiter_at_epoch();

        limiter.check(1, 1, 1000);
        clock.advance_ms(1000);
        assert!(limiter.check(1, 1, 1000).allowed);
    }

    #[test]
    fn test_agents_are_independent() {
        let (limiter, _clock) = limiter_at_epoch();

        assert!(limiter.check(1, 1, 1000).allowed);
        assert!(!limiter.check(1, 1, 1000).allowed);
        assert!(limiter.check(2, 1, 1000).allowed);
        assert_eq!(limiter.tracked(), 2);
    }

    #[test]
    fn test_boundary_burst_admits_more_than_the_limit() {
        let (limiter, clock) = limiter_at_epoch();

        assert!(limiter.check(9, 5, 1000).allowed);
        clock.advance_ms(999);
        let before: usize = (0..5).filter(|_| limiter.check(9, 5, 1000).allowed).count();
        clock.advance_ms(1);
        let after: usize = (0..5).filter(|_| limiter.check(9, 5, 1000).allowed).count();

        // 9 admitted within 1ms for a limit of 5
        assert_eq!(before, 4);
        assert_eq!(after, 5);
    }

    #[test]
    fn test_purge_and_reset() {
        let (limiter, clock) = limiter_at_epoch();

        limiter.check(1, 5, 1000);
        limiter.check(2, 5, 5000);
        clock.advance_ms(2000);

        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.tracked(), 1);

        limiter.reset_agent(2);
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_concurrent_checks_never_overcount() {
        let limiter = Arc::new(RateLimiter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.check(42, 100, 60_000).allowed)
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }
}
