//! Distributed cache tier.
//!
//! Pluggable backend trait plus the per-cache-name TTL table. The Redis
//! backend is the production choice; the in-memory backend keeps single
//! instance deployments and tests honest.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;

#[derive(Debug)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "distributed store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

/// Pluggable distributed cache backend.
pub trait DistributedStore: Send + Sync + 'static {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>, StoreError>> + Send + 'a>>;

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    fn remove<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    fn remove_by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;
}

/// Distributed-tier TTL per cache name.
///
/// Unknown names fall back to ten minutes.
pub fn profile_ttl(cache_name: &str) -> Duration {
    match cache_name {
        "sessions" => Duration::from_secs(30 * 60),
        "job-meta" => Duration::from_secs(2 * 60 * 60),
        "dashboard" => Duration::from_secs(5 * 60),
        "plans" => Duration::from_secs(24 * 60 * 60),
        "ai-fingerprints" => Duration::from_secs(6 * 60 * 60),
        "ratelimit" => Duration::from_secs(60),
        _ => Duration::from_secs(10 * 60),
    }
}

/// In-memory stand-in for the distributed tier.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<DashMap<String, (Bytes, Instant)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DistributedStore for InMemoryStore {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(entry) = self.inner.get(key) {
                let (value, expires) = entry.value();
                if Instant::now() < *expires {
                    return Ok(Some(value.clone()));
                }
                drop(entry);
                self.inner.remove(key);
            }
            Ok(None)
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.inner
                .insert(key.to_string(), (value, Instant::now() + ttl));
            Ok(())
        })
    }

    fn remove<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.inner.remove(key);
            Ok(())
        })
    }

    fn remove_by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.inner.retain(|k, _| !k.starts_with(prefix));
            Ok(())
        })
    }
}
