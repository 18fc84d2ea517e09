//! The two-tier read/write fabric.
//!
//! Read path is L1 → L2 → loader, with an L1 backfill on every L2 hit.
//! Warm entries evicted from L1 for size or expiry are promoted to L2 in
//! the background. Explicit invalidation clears both tiers. L2 failures
//! degrade to a miss; the origin is always consulted in that case.
//!
//! Hit/miss counters are incremented right here at the access sites.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use applygate_core::metrics::cache_lookups;

use crate::gzip;
use crate::l1::{EvictionCause, LocalCache};
use crate::l2::{profile_ttl, DistributedStore, StoreError};
use crate::policy::AdaptiveExpiry;

/// Promotion threshold: entries observed at more than this many accesses
/// per second when they leave L1 are worth keeping in L2.
const PROMOTE_MIN_FREQUENCY: f64 = 0.5;

#[derive(Clone)]
pub struct TieredCache {
    name: &'static str,
    l1: Arc<LocalCache>,
    l2: Arc<dyn DistributedStore>,
    l2_ttl: Duration,
    compress_threshold: usize,
}

impl TieredCache {
    /// Build a named cache over the given distributed store. The name
    /// selects the L2 TTL profile and prefixes every distributed key.
    pub fn new(name: &'static str, l2: Arc<dyn DistributedStore>, max_l1_entries: usize) -> Self {
        let l2_ttl = profile_ttl(name);
        let compress_threshold = 1_024;

        let promote_l2 = l2.clone();
        let l1 = LocalCache::new(max_l1_entries, Arc::new(AdaptiveExpiry::default()))
            .with_eviction_hook(Arc::new(move |key, value, cause, frequency| {
                let promotable = matches!(cause, EvictionCause::Size | EvictionCause::Expired)
                    && frequency > PROMOTE_MIN_FREQUENCY;
                if !promotable {
                    return;
                }
                let store = promote_l2.clone();
                let key = format!("{name}:{key}");
                let value = gzip::pack(value, compress_threshold);
                tokio::spawn(async move {
                    if let Err(err) = store.set(&key, value, l2_ttl).await {
                        debug!(error = %err, key, "L2 promotion failed");
                    }
                });
            }));

        Self {
            name,
            l1: Arc::new(l1),
            l2,
            l2_ttl,
            compress_threshold,
        }
    }

    fn l2_key(&self, key: &str) -> String {
        format!("{}:{key}", self.name)
    }

    fn record(&self, tier: &str, outcome: &str) {
        cache_lookups()
            .with_label_values(&[self.name, tier, outcome])
            .inc();
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(value) = self.l1.get(key) {
            self.record("l1", "hit");
            return Some(value);
        }
        self.record("l1", "miss");

        match self.l2.get(&self.l2_key(key)).await {
            Ok(Some(raw)) => match gzip::unpack(raw) {
                Ok(value) => {
                    self.record("l2", "hit");
                    self.l1.insert(key, value.clone());
                    Some(value)
                }
                Err(err) => {
                    warn!(error = %err, cache = self.name, key, "undecodable L2 value dropped");
                    let _ = self.l2.remove(&self.l2_key(key)).await;
                    self.record("l2", "miss");
                    None
                }
            },
            Ok(None) => {
                self.record("l2", "miss");
                None
            }
            Err(err) => {
                // A broken distributed tier is a miss, not a failure.
                warn!(error = %err, cache = self.name, "L2 unreachable, treating as miss");
                self.record("l2", "error");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: Bytes) {
        self.l1.insert(key, value.clone());
        let packed = gzip::pack(&value, self.compress_threshold);
        if let Err(err) = self.l2.set(&self.l2_key(key), packed, self.l2_ttl).await {
            warn!(error = %err, cache = self.name, "L2 set failed");
        }
    }

    /// Read through both tiers, falling back to `loader` and caching its
    /// result.
    pub async fn get_or_load<F, Fut, E>(&self, key: &str, loader: F) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Bytes, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = loader().await?;
        self.set(key, value.clone()).await;
        Ok(value)
    }

    /// Delete from both tiers.
    pub async fn invalidate(&self, key: &str) {
        self.l1.remove(key);
        if let Err(err) = self.l2.remove(&self.l2_key(key)).await {
            warn!(error = %err, cache = self.name, "L2 invalidation failed");
        }
    }

    /// Drop every entry of this cache from both tiers.
    pub async fn invalidate_all(&self) -> Result<(), StoreError> {
        self.l1.clear();
        self.l2.remove_by_prefix(&format!("{}:", self.name)).await
    }

    // JSON helpers for typed call sites.

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(error = %err, cache = self.name, key, "cached JSON undecodable, invalidating");
                self.invalidate(key).await;
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, Bytes::from(bytes)).await,
            Err(err) => warn!(error = %err, cache = self.name, "JSON encode failed"),
        }
    }
}
