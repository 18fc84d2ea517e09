//! Brute-force guard for login endpoints.
//!
//! Failed attempts are tracked per (principal, client address). Once the
//! failure budget is spent inside the window the pair is locked out and
//! further attempts are rejected until the lockout elapses. Successful
//! logins clear the slate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct AttemptState {
    failures: u32,
    window_start: Instant,
    locked_until: Option<Instant>,
}

#[derive(Clone)]
pub struct LoginLockout {
    attempts: Arc<DashMap<String, AttemptState>>,
    max_failures: u32,
    window: Duration,
    lockout: Duration,
}

/// Outcome of a pre-login check.
#[derive(Debug, PartialEq, Eq)]
pub enum LockoutDecision {
    Allowed,
    /// Locked out; retry after the contained number of seconds.
    Locked { retry_after_secs: u64 },
}

impl LoginLockout {
    pub fn new(max_failures: u32, window: Duration, lockout: Duration) -> Self {
        Self {
            attempts: Arc::new(DashMap::new()),
            max_failures,
            window,
            lockout,
        }
    }

    fn key(principal: &str, addr: &str) -> String {
        format!("{principal}|{addr}")
    }

    /// Check whether a login attempt may proceed.
    pub fn check(&self, principal: &str, addr: &str) -> LockoutDecision {
        let key = Self::key(principal, addr);
        if let Some(entry) = self.attempts.get(&key) {
            if let Some(until) = entry.locked_until {
                let now = Instant::now();
                if now < until {
                    return LockoutDecision::Locked {
                        retry_after_secs: (until - now).as_secs().max(1),
                    };
                }
            }
        }
        LockoutDecision::Allowed
    }

    /// Record a failed attempt; may trip the lockout.
    pub fn record_failure(&self, principal: &str, addr: &str) {
        let key = Self::key(principal, addr);
        let now = Instant::now();
        let mut entry = self.attempts.entry(key).or_insert_with(|| AttemptState {
            failures: 0,
            window_start: now,
            locked_until: None,
        });

        let state = entry.value_mut();
        if now.duration_since(state.window_start) > self.window {
            state.failures = 0;
            state.window_start = now;
            state.locked_until = None;
        }
        state.failures += 1;
        if state.failures >= self.max_failures {
            state.locked_until = Some(now + self.lockout);
            tracing::warn!(failures = state.failures, "login lockout tripped");
        }
    }

    /// A successful login clears the pair's history.
    pub fn record_success(&self, principal: &str, addr: &str) {
        self.attempts.remove(&Self::key(principal, addr));
    }
}

impl Default for LoginLockout {
    fn default() -> Self {
        // 5 failures in 15 minutes locks for 15 minutes.
        Self::new(5, Duration::from_secs(900), Duration::from_secs(900))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_after_budget_spent() {
        let guard = LoginLockout::new(3, Duration::from_secs(60), Duration::from_secs(60));
        for _ in 0..2 {
            guard.record_failure("a@b.c", "1.2.3.4");
        }
        assert_eq!(guard.check("a@b.c", "1.2.3.4"), LockoutDecision::Allowed);
        guard.record_failure("a@b.c", "1.2.3.4");
        assert!(matches!(
            guard.check("a@b.c", "1.2.3.4"),
            LockoutDecision::Locked { .. }
        ));
    }

    #[test]
    fn other_address_is_independent() {
        let guard = LoginLockout::new(1, Duration::from_secs(60), Duration::from_secs(60));
        guard.record_failure("a@b.c", "1.2.3.4");
        assert!(matches!(
            guard.check("a@b.c", "1.2.3.4"),
            LockoutDecision::Locked { .. }
        ));
        assert_eq!(guard.check("a@b.c", "5.6.7.8"), LockoutDecision::Allowed);
    }

    #[test]
    fn success_clears_history() {
        let guard = LoginLockout::new(1, Duration::from_secs(60), Duration::from_secs(60));
        guard.record_failure("a@b.c", "1.2.3.4");
        guard.record_success("a@b.c", "1.2.3.4");
        assert_eq!(guard.check("a@b.c", "1.2.3.4"), LockoutDecision::Allowed);
    }
}
