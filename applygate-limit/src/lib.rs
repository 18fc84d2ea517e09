//! Per-subject rate limiting over three nested fixed windows (minute,
//! hour, day) stored in a distributed counter store.
//!
//! The limiter is strict: counters are incremented first, and when any
//! window lands over its cap the increments are compensated with a
//! decrement in the same window and the request is denied. No counter
//! exceeds its cap in a consistent snapshot.
//!
//! Counter-store failure fails open: the request is admitted uncounted,
//! the failure is logged once per decision and the degraded-mode metric
//! is incremented. Availability over strictness.

pub mod redis;

pub use crate::redis::RedisCounterStore;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

/// Counter-store failure.
#[derive(Debug)]
pub struct CounterError(pub String);

impl std::fmt::Display for CounterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "counter store error: {}", self.0)
    }
}

impl std::error::Error for CounterError {}

/// Pluggable distributed counter backend.
///
/// `incr` must be atomic and set the TTL only when it creates the key,
/// so the window expires `ttl_secs` after its first hit.
pub trait CounterStore: Send + Sync + 'static {
    fn incr<'a>(
        &'a self,
        key: &'a str,
        ttl_secs: u64,
    ) -> Pin<Box<dyn Future<Output = Result<u64, CounterError>> + Send + 'a>>;

    fn decr<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CounterError>> + Send + 'a>>;
}

/// The three window granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    pub fn secs(&self) -> u64 {
        match self {
            Window::Minute => 60,
            Window::Hour => 3_600,
            Window::Day => 86_400,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }

    pub const ALL: [Window; 3] = [Window::Minute, Window::Hour, Window::Day];
}

/// Post-increment usage counts across all three windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub minute: u64,
    pub hour: u64,
    pub day: u64,
}

impl WindowCounts {
    fn get(&self, window: Window) -> u64 {
        match window {
            Window::Minute => self.minute,
            Window::Hour => self.hour,
            Window::Day => self.day,
        }
    }

    fn set(&mut self, window: Window, value: u64) {
        match window {
            Window::Minute => self.minute = value,
            Window::Hour => self.hour = value,
            Window::Day => self.day = value,
        }
    }
}

/// Caps per window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub per_minute: u64,
    pub per_hour: u64,
    pub per_day: u64,
}

impl RateLimits {
    fn cap(&self, window: Window) -> u64 {
        match window {
            Window::Minute => self.per_minute,
            Window::Hour => self.per_hour,
            Window::Day => self.per_day,
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1_000,
            per_day: 5_000,
        }
    }
}

/// Outcome of a limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        counts: WindowCounts,
    },
    Denied {
        counts: WindowCounts,
        retry_after_secs: u64,
    },
    /// The counter store was unreachable; the request is admitted
    /// uncounted.
    Degraded,
}

/// Sliding-window limiter over a [`CounterStore`].
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    store: Arc<dyn CounterStore>,
    limits: RateLimits,
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limits: RateLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    fn key(subject: &str, window: Window) -> String {
        format!("ratelimit:{subject}:{}", window.label())
    }

    /// Check and count one request for `subject`.
    pub async fn check(&self, subject: &str) -> RateLimitDecision {
        let mut counts = WindowCounts::default();

        for window in Window::ALL {
            let key = Self::key(subject, window);
            match self.store.incr(&key, window.secs()).await {
                Ok(value) => counts.set(window, value),
                Err(err) => {
                    tracing::warn!(error = %err, subject, "counter store unreachable, failing open");
                    applygate_core::metrics::rate_limiter_degraded().inc();
                    // Best-effort rollback of whatever was already counted.
                    for done in Window::ALL.iter().take_while(|w| **w != window) {
                        let _ = self.store.decr(&Self::key(subject, *done)).await;
                    }
                    return RateLimitDecision::Degraded;
                }
            }
        }

        let exceeded: Vec<Window> = Window::ALL
            .into_iter()
            .filter(|w| counts.get(*w) > self.limits.cap(*w))
            .collect();

        if exceeded.is_empty() {
            return RateLimitDecision::Allowed { counts };
        }

        // Compensate so denied requests never consume budget; the reported
        // counts stay post-increment so callers see what tripped the cap.
        for window in Window::ALL {
            let _ = self.store.decr(&Self::key(subject, window)).await;
        }

        let retry_after_secs = exceeded.iter().map(|w| w.secs()).min().unwrap_or(60);
        RateLimitDecision::Denied { counts, retry_after_secs }
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// In-process counter store. Single-instance deployments and tests; the
/// Redis backend is the production choice.
#[derive(Clone)]
pub struct InMemoryCounterStore {
    counters: Arc<DashMap<String, (u64, Instant)>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn incr<'a>(
        &'a self,
        key: &'a str,
        ttl_secs: u64,
    ) -> Pin<Box<dyn Future<Output = Result<u64, CounterError>> + Send + 'a>> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entry = self
                .counters
                .entry(key.to_string())
                .or_insert_with(|| (0, now + std::time::Duration::from_secs(ttl_secs)));
            let (value, expires) = entry.value_mut();
            if now >= *expires {
                *value = 0;
                *expires = now + std::time::Duration::from_secs(ttl_secs);
            }
            *value += 1;
            Ok(*value)
        })
    }

    fn decr<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CounterError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(mut entry) = self.counters.get_mut(key) {
                let (value, _) = entry.value_mut();
                *value = value.saturating_sub(1);
            }
            Ok(())
        })
    }
}
