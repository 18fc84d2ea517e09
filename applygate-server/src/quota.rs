//! Plan-vs-usage enforcement.
//!
//! The active subscription is read through the distributed cache (plans
//! profile). A subject with no subscription row is admitted — plan
//! provisioning belongs to billing, and a missing row must not take the
//! product down. Usage is recorded only after a successful dispatch; the
//! cache entry is invalidated so the next check sees the new count.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use applygate_cache::TieredCache;
use applygate_core::ApiError;
use applygate_data::{SubscriptionLedger, SubscriptionRecord};

pub struct QuotaService {
    subscriptions: Arc<dyn SubscriptionLedger>,
    cache: TieredCache,
}

impl QuotaService {
    pub fn new(subscriptions: Arc<dyn SubscriptionLedger>, cache: TieredCache) -> Self {
        Self { subscriptions, cache }
    }

    fn cache_key(subject_id: Uuid) -> String {
        format!("subscription:{subject_id}")
    }

    async fn load(&self, subject_id: Uuid) -> Result<Option<SubscriptionRecord>, ApiError> {
        let key = Self::cache_key(subject_id);
        if let Some(record) = self.cache.get_json::<SubscriptionRecord>(&key).await {
            return Ok(Some(record));
        }
        let record = self.subscriptions.active_for(subject_id).await?;
        if let Some(ref record) = record {
            self.cache.set_json(&key, record).await;
        }
        Ok(record)
    }

    /// Deny with `quota` when the subject's plan budget is spent.
    pub async fn ensure_available(&self, subject_id: Uuid) -> Result<(), ApiError> {
        match self.load(subject_id).await? {
            Some(subscription) if subscription.quota_exhausted() => {
                Err(ApiError::quota("monthly quota exhausted"))
            }
            Some(_) => Ok(()),
            None => {
                debug!(%subject_id, "no active subscription, admitting");
                Ok(())
            }
        }
    }

    /// Count one successful dispatch. At-least-once, best-effort:
    /// failures are logged and surface nowhere — under-counting is the
    /// one outcome billing does not accept.
    pub async fn record_usage(&self, subject_id: Uuid) {
        if let Err(err) = self.subscriptions.increment_usage(subject_id).await {
            tracing::warn!(error = %err, %subject_id, "usage increment failed");
        }
        self.cache.invalidate(&Self::cache_key(subject_id)).await;
    }

    /// Usage snapshot for the dashboard.
    pub async fn snapshot(&self, subject_id: Uuid) -> Result<Option<SubscriptionRecord>, ApiError> {
        self.load(subject_id).await
    }
}
