//! Validation cache for verified tokens.
//!
//! Keys are SHA-256 hashes of the raw token so the token itself is never
//! held in memory longer than the request. Entries carry their own TTL
//! and are lazily evicted on access.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use applygate_core::types::Subject;

#[derive(Clone)]
pub struct TokenCache {
    inner: Arc<DashMap<[u8; 32], (Subject, Instant)>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    fn key(token: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hasher.finalize().into()
    }

    pub fn get(&self, token: &str) -> Option<Subject> {
        let key = Self::key(token);
        if let Some(entry) = self.inner.get(&key) {
            let (subject, expires) = entry.value();
            if Instant::now() < *expires {
                return Some(subject.clone());
            }
            drop(entry);
            self.inner.remove(&key);
        }
        None
    }

    pub fn insert(&self, token: &str, subject: Subject, ttl: Duration) {
        self.inner
            .insert(Self::key(token), (subject, Instant::now() + ttl));
    }

    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.inner.retain(|_, (_, expires)| now < *expires);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use applygate_core::types::Role;
    use uuid::Uuid;

    fn subject() -> Subject {
        Subject {
            id: Uuid::new_v4(),
            principal: "a@b.c".into(),
            roles: vec![Role::User],
        }
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = TokenCache::new();
        cache.insert("tok", subject(), Duration::ZERO);
        assert!(cache.get("tok").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn live_entry_hits() {
        let cache = TokenCache::new();
        let s = subject();
        cache.insert("tok", s.clone(), Duration::from_secs(60));
        assert_eq!(cache.get("tok").unwrap().id, s.id);
        assert!(cache.get("other").is_none());
    }

    #[test]
    fn evict_expired_sweeps() {
        let cache = TokenCache::new();
        cache.insert("dead", subject(), Duration::ZERO);
        cache.insert("live", subject(), Duration::from_secs(60));
        cache.evict_expired();
        assert_eq!(cache.len(), 1);
    }
}
