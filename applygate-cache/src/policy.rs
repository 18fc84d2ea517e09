//! Expiry and weight policies for the in-process tier.
//!
//! A policy decides the initial TTL of a fresh entry, how the TTL moves
//! as the entry is accessed, and the entry's eviction weight. Policies
//! are chosen at startup; the adaptive policy is the default.

use std::time::Duration;

/// Access statistics for one entry, as seen at refresh time.
#[derive(Debug, Clone, Copy)]
pub struct EntryStats {
    /// Hits since insertion.
    pub hits: u64,
    /// Time since insertion.
    pub age: Duration,
    /// Time since the previous access.
    pub idle: Duration,
    /// Value size in bytes.
    pub size: usize,
}

impl EntryStats {
    /// Accesses per second over the entry's lifetime.
    pub fn frequency(&self) -> f64 {
        self.hits as f64 / self.age.as_secs_f64().max(1.0)
    }
}

pub trait ExpiryPolicy: Send + Sync + 'static {
    /// TTL for a freshly inserted entry.
    fn initial_ttl(&self, size: usize) -> Duration;

    /// New TTL to apply on access, or `None` to leave the deadline alone.
    fn refresh_ttl(&self, stats: &EntryStats) -> Option<Duration>;

    /// Eviction weight; heavier entries are evicted first.
    fn weight(&self, size: usize) -> u32 {
        // Default: weight grows with size so small entries are favoured.
        (size / 64).max(1) as u32
    }
}

/// Fixed TTL, no adaptation.
pub struct FixedExpiry {
    pub ttl: Duration,
}

impl ExpiryPolicy for FixedExpiry {
    fn initial_ttl(&self, _size: usize) -> Duration {
        self.ttl
    }

    fn refresh_ttl(&self, _stats: &EntryStats) -> Option<Duration> {
        None
    }
}

/// Adaptive TTL: frequently accessed entries live longer, idle entries
/// are cut short.
pub struct AdaptiveExpiry {
    pub base_ttl: Duration,
    pub min_ttl: Duration,
    pub max_ttl: Duration,
}

impl AdaptiveExpiry {
    pub fn new(base_ttl: Duration) -> Self {
        Self {
            base_ttl,
            min_ttl: base_ttl / 4,
            max_ttl: base_ttl * 4,
        }
    }
}

impl Default for AdaptiveExpiry {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl ExpiryPolicy for AdaptiveExpiry {
    fn initial_ttl(&self, _size: usize) -> Duration {
        self.base_ttl
    }

    fn refresh_ttl(&self, stats: &EntryStats) -> Option<Duration> {
        // More than one access per base window extends the lease; an
        // entry gone idle for over half the base window gets shortened.
        let frequency = stats.frequency();
        let hot_threshold = 1.0 / self.base_ttl.as_secs_f64().max(1.0);

        if frequency > hot_threshold * 2.0 {
            Some(self.max_ttl.min(self.base_ttl * 2))
        } else if stats.idle > self.base_ttl / 2 {
            Some(self.min_ttl)
        } else {
            Some(self.base_ttl)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_entries_get_extended() {
        let policy = AdaptiveExpiry::new(Duration::from_secs(100));
        let stats = EntryStats {
            hits: 50,
            age: Duration::from_secs(10),
            idle: Duration::from_secs(1),
            size: 100,
        };
        assert_eq!(policy.refresh_ttl(&stats), Some(Duration::from_secs(200)));
    }

    #[test]
    fn idle_entries_get_shortened() {
        let policy = AdaptiveExpiry::new(Duration::from_secs(100));
        let stats = EntryStats {
            hits: 1,
            age: Duration::from_secs(90),
            idle: Duration::from_secs(80),
            size: 100,
        };
        assert_eq!(policy.refresh_ttl(&stats), Some(Duration::from_secs(25)));
    }

    #[test]
    fn weight_favours_small_entries() {
        let policy = FixedExpiry { ttl: Duration::from_secs(60) };
        assert!(policy.weight(16) < policy.weight(64 * 1024));
        assert!(policy.weight(0) >= 1);
    }
}
