//! Process-local decision metrics.
//!
//! Counters are per decision code and are lost on restart; durable totals
//! live in the store and are served by `/api/stats`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::pipeline::Decision;

/// Latencies kept for percentile calculation
const LATENCY_WINDOW: usize = 1000;

/// Decision codes in counter order
const CODES: [&str; 9] = [
    "allow",
    "threat_blocked",
    "response_threat",
    "rate_limited",
    "quarantined",
    "unauthorized",
    "bad_request",
    "proxy_error",
    "internal_error",
];

fn slot(decision: &Decision) -> usize {
    match decision {
        Decision::Allow(_) => 0,
        Decision::ThreatBlocked(_) => 1,
        Decision::ResponseThreat(_) => 2,
        Decision::RateLimited { .. } => 3,
        Decision::Quarantined => 4,
        Decision::Unauthorized(_) => 5,
        Decision::BadRequest(_) => 6,
        Decision::ProxyError => 7,
        Decision::InternalError => 8,
    }
}

/// Recent latencies and the start of the current measuring period
#[derive(Debug)]
struct Window {
    latencies: VecDeque<Duration>,
    since: Instant,
}

impl Window {
    fn fresh() -> Self {
        Self {
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
            since: Instant::now(),
        }
    }
}

/// Latency percentiles over the recent window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Percentiles {
    /// Median
    pub p50: Duration,
    /// 95th percentile
    pub p95: Duration,
    /// 99th percentile
    pub p99: Duration,
}

impl Percentiles {
    fn of(samples: &VecDeque<Duration>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<Duration> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let rank = |p: usize| sorted[(sorted.len() * p / 100).min(sorted.len() - 1)];

        Some(Self {
            p50: rank(50),
            p95: rank(95),
            p99: rank(99),
        })
    }
}

/// Thread-safe decision metrics
#[derive(Debug)]
pub struct ProxyStats {
    by_code: [AtomicU64; CODES.len()],
    secrets_redacted: AtomicU64,
    window: Mutex<Window>,
}

impl Default for ProxyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyStats {
    /// Start measuring now
    pub fn new() -> Self {
        Self {
            by_code: Default::default(),
            secrets_redacted: AtomicU64::new(0),
            window: Mutex::new(Window::fresh()),
        }
    }

    /// Record a finished call
    pub fn record(&self, decision: &Decision, latency: Duration) {
        self.by_code[slot(decision)].fetch_add(1, Ordering::Relaxed);
        if let Decision::Allow(allowed) = decision {
            self.secrets_redacted
                .fetch_add(allowed.secrets_redacted as u64, Ordering::Relaxed);
        }

        if let Ok(mut window) = self.window.lock() {
            if window.latencies.len() == LATENCY_WINDOW {
                window.latencies.pop_front();
            }
            window.latencies.push_back(latency);
        }
    }

    /// Calls recorded with the given decision code
    pub fn count(&self, code: &str) -> u64 {
        CODES
            .iter()
            .position(|c| *c == code)
            .map_or(0, |i| self.by_code[i].load(Ordering::Relaxed))
    }

    /// All calls recorded
    pub fn total_requests(&self) -> u64 {
        self.by_code.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// Calls refused for content, in either direction
    pub fn blocked(&self) -> u64 {
        self.count("threat_blocked") + self.count("response_threat")
    }

    /// Secrets replaced across allowed calls
    pub fn secrets_redacted(&self) -> u64 {
        self.secrets_redacted.load(Ordering::Relaxed)
    }

    /// Percentiles over the most recent calls
    pub fn percentiles(&self) -> Option<Percentiles> {
        self.window
            .lock()
            .ok()
            .and_then(|w| Percentiles::of(&w.latencies))
    }

    /// Time since start or the last reset
    pub fn uptime(&self) -> Duration {
        self.window
            .lock()
            .map(|w| w.since.elapsed())
            .unwrap_or_default()
    }

    /// Average call rate since start or the last reset
    pub fn requests_per_second(&self) -> f64 {
        match self.uptime().as_secs_f64() {
            secs if secs > 0.0 => self.total_requests() as f64 / secs,
            _ => 0.0,
        }
    }

    /// Snapshot for `/metrics`
    pub fn summary(&self) -> StatsSummary {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        let percentiles = self.percentiles();

        StatsSummary {
            total_requests: self.total_requests(),
            allowed: self.count("allow"),
            threats_blocked: self.count("threat_blocked"),
            response_threats: self.count("response_threat"),
            secrets_redacted: self.secrets_redacted(),
            rate_limited: self.count("rate_limited"),
            quarantined: self.count("quarantined"),
            unauthorized: self.count("unauthorized"),
            bad_requests: self.count("bad_request"),
            proxy_errors: self.count("proxy_error"),
            internal_errors: self.count("internal_error"),
            p50_latency_ms: percentiles.map(|p| ms(p.p50)),
            p95_latency_ms: percentiles.map(|p| ms(p.p95)),
            p99_latency_ms: percentiles.map(|p| ms(p.p99)),
            uptime_secs: self.uptime().as_secs(),
            requests_per_second: self.requests_per_second(),
        }
    }

    /// Zero every counter and restart the measuring period
    pub fn reset(&self) {
        for counter in self.by_code.iter().chain([&self.secrets_redacted]) {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut window) = self.window.lock() {
            *window = Window::fresh();
        }
    }
}

/// `/metrics` response body
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    /// All calls
    pub total_requests: u64,
    /// `allow`
    pub allowed: u64,
    /// `threat_blocked`
    pub threats_blocked: u64,
    /// `response_threat`
    pub response_threats: u64,
    /// Secrets replaced across allowed calls
    pub secrets_redacted: u64,
    /// `rate_limited`
    pub rate_limited: u64,
    /// `quarantined`
    pub quarantined: u64,
    /// `unauthorized`
    pub unauthorized: u64,
    /// `bad_request`
    pub bad_requests: u64,
    /// `proxy_error`
    pub proxy_errors: u64,
    /// `internal_error`
    pub internal_errors: u64,
    /// Median latency, ms
    pub p50_latency_ms: Option<f64>,
    /// 95th percentile latency, ms
    pub p95_latency_ms: Option<f64>,
    /// 99th percentile latency, ms
    pub p99_latency_ms: Option<f64>,
    /// Seconds since start or the last reset
    pub uptime_secs: u64,
    /// Average call rate
    pub requests_per_second: f64,
}
