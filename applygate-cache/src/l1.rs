//! In-process cache tier.
//!
//! Bounded entry count, per-entry adaptive expiry via an
//! [`ExpiryPolicy`], weighted eviction that favours keeping small
//! entries, and a bloom filter short-circuiting lookups of keys that
//! were never inserted. Eviction of still-warm entries is reported to an
//! optional hook so the tiered fabric can promote them to L2.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;

use crate::bloom::BloomFilter;
use crate::policy::{EntryStats, ExpiryPolicy};

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionCause {
    Expired,
    Size,
    Explicit,
}

/// Callback invoked when an entry is evicted. Receives the key, the
/// value, the cause and the entry's observed access frequency
/// (hits per second).
pub type EvictionHook = Arc<dyn Fn(&str, &Bytes, EvictionCause, f64) + Send + Sync>;

struct Entry {
    value: Bytes,
    inserted: Instant,
    last_access: Instant,
    expires: Instant,
    hits: u64,
    weight: u32,
}

impl Entry {
    fn stats(&self, now: Instant) -> EntryStats {
        EntryStats {
            hits: self.hits,
            age: now.duration_since(self.inserted),
            idle: now.duration_since(self.last_access),
            size: self.value.len(),
        }
    }

    fn frequency(&self, now: Instant) -> f64 {
        self.hits as f64 / now.duration_since(self.inserted).as_secs_f64().max(1.0)
    }
}

pub struct LocalCache {
    entries: DashMap<String, Entry>,
    bloom: BloomFilter,
    policy: Arc<dyn ExpiryPolicy>,
    max_entries: usize,
    on_evict: Option<EvictionHook>,
}

impl LocalCache {
    pub fn new(max_entries: usize, policy: Arc<dyn ExpiryPolicy>) -> Self {
        Self {
            entries: DashMap::new(),
            bloom: BloomFilter::default(),
            policy,
            max_entries,
            on_evict: None,
        }
    }

    pub fn with_eviction_hook(mut self, hook: EvictionHook) -> Self {
        self.on_evict = Some(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        // Known-absent keys never touch the map.
        if !self.bloom.might_contain(key) {
            return None;
        }

        let now = Instant::now();
        let expired = {
            let mut entry = self.entries.get_mut(key)?;
            if now >= entry.expires {
                true
            } else {
                entry.hits += 1;
                if let Some(ttl) = self.policy.refresh_ttl(&entry.stats(now)) {
                    entry.expires = now + ttl;
                }
                entry.last_access = now;
                return Some(entry.value.clone());
            }
        };

        if expired {
            if let Some((key, entry)) = self.entries.remove(key) {
                self.notify(&key, &entry, EvictionCause::Expired, now);
            }
        }
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: Bytes) {
        let key = key.into();
        let now = Instant::now();

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_one(now);
        }

        let ttl = self.policy.initial_ttl(value.len());
        let weight = self.policy.weight(value.len());
        self.bloom.insert(&key);
        self.entries.insert(
            key,
            Entry {
                value,
                inserted: now,
                last_access: now,
                expires: now + ttl,
                hits: 0,
                weight,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        if let Some((key, entry)) = self.entries.remove(key) {
            self.notify(&key, &entry, EvictionCause::Explicit, Instant::now());
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Sweep expired entries.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let dead: Vec<String> = self
            .entries
            .iter()
            .filter(|e| now >= e.expires)
            .map(|e| e.key().clone())
            .collect();
        for key in dead {
            if let Some((key, entry)) = self.entries.remove(&key) {
                self.notify(&key, &entry, EvictionCause::Expired, now);
            }
        }
    }

    /// Evict the worst entry: heaviest weight per unit of access
    /// frequency, so large cold entries go first and small hot ones stay.
    fn evict_one(&self, now: Instant) {
        let victim = self
            .entries
            .iter()
            .map(|e| {
                let score = e.weight as f64 / (e.frequency(now) + 0.01);
                (e.key().clone(), score)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(key, _)| key);

        if let Some(key) = victim {
            if let Some((key, entry)) = self.entries.remove(&key) {
                self.notify(&key, &entry, EvictionCause::Size, now);
            }
        }
    }

    fn notify(&self, key: &str, entry: &Entry, cause: EvictionCause, now: Instant) {
        if let Some(ref hook) = self.on_evict {
            hook(key, &entry.value, cause, entry.frequency(now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::FixedExpiry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn cache(max: usize, ttl: Duration) -> LocalCache {
        LocalCache::new(max, Arc::new(FixedExpiry { ttl }))
    }

    #[test]
    fn insert_get_roundtrip() {
        let cache = cache(10, Duration::from_secs(60));
        cache.insert("k", Bytes::from_static(b"v"));
        assert_eq!(cache.get("k").unwrap(), Bytes::from_static(b"v"));
        assert!(cache.get("absent").is_none());
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = cache(10, Duration::ZERO);
        cache.insert("k", Bytes::from_static(b"v"));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn size_eviction_keeps_bound() {
        let cache = cache(3, Duration::from_secs(60));
        for i in 0..5 {
            cache.insert(format!("k{i}"), Bytes::from_static(b"v"));
        }
        assert!(cache.len() <= 3);
    }

    #[test]
    fn eviction_prefers_large_cold_entries() {
        let cache = cache(2, Duration::from_secs(60));
        cache.insert("small-hot", Bytes::from_static(b"x"));
        cache.insert("large-cold", Bytes::from(vec![0u8; 64 * 1024]));
        // Touch the small entry so it has observed frequency.
        for _ in 0..10 {
            cache.get("small-hot");
        }
        cache.insert("new", Bytes::from_static(b"y"));
        assert!(cache.get("small-hot").is_some(), "hot small entry must survive");
        assert!(cache.get("large-cold").is_none(), "large cold entry must be evicted");
    }

    #[test]
    fn eviction_hook_fires_with_cause() {
        let causes = Arc::new(Mutex::new(Vec::new()));
        let hook_causes = causes.clone();
        let cache = LocalCache::new(1, Arc::new(FixedExpiry { ttl: Duration::from_secs(60) }))
            .with_eviction_hook(Arc::new(move |key, _, cause, _| {
                hook_causes.lock().unwrap().push((key.to_string(), cause));
            }));
        cache.insert("a", Bytes::from_static(b"1"));
        cache.insert("b", Bytes::from_static(b"2"));
        let seen = causes.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("a".to_string(), EvictionCause::Size));
    }

    #[test]
    fn bloom_short_circuits_never_inserted_keys() {
        // Indirect check: lookups of never-inserted keys do not count as
        // map accesses (no panics, plain None), and present keys still hit
        // after the filter says maybe.
        let cache = cache(10, Duration::from_secs(60));
        assert!(cache.get("never").is_none());
        cache.insert("yes", Bytes::from_static(b"v"));
        assert!(cache.get("yes").is_some());
    }

    #[test]
    fn explicit_remove_notifies() {
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = count.clone();
        let cache = LocalCache::new(10, Arc::new(FixedExpiry { ttl: Duration::from_secs(60) }))
            .with_eviction_hook(Arc::new(move |_, _, cause, _| {
                if cause == EvictionCause::Explicit {
                    hook_count.fetch_add(1, Ordering::SeqCst);
                }
            }));
        cache.insert("k", Bytes::from_static(b"v"));
        cache.remove("k");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
