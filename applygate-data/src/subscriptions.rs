//! Subscription and plan reads plus the usage counter.
//!
//! The billing system owns these rows; the gateway only reads the active
//! subscription for quota checks and bumps `units_used` after a
//! successful dispatch. The increment is best-effort at-least-once:
//! double-counting on a retry is accepted over under-counting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::DataError;
use crate::routing::RoutedPool;
use std::sync::Arc;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub plan_id: Uuid,
    pub plan_name: String,
    /// `None` means unlimited.
    pub monthly_quota: Option<i64>,
    pub units_used: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl SubscriptionRecord {
    pub fn quota_exhausted(&self) -> bool {
        match self.monthly_quota {
            Some(quota) => self.units_used >= quota,
            None => false,
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionStore {
    router: Arc<RoutedPool>,
}

impl SubscriptionStore {
    pub fn new(router: Arc<RoutedPool>) -> Self {
        Self { router }
    }

    /// The subject's subscription covering the current period, joined
    /// with its plan.
    pub async fn active_for(&self, subject_id: Uuid) -> Result<Option<SubscriptionRecord>, DataError> {
        let record = sqlx::query_as(
            "SELECT s.id, s.user_id AS subject_id, s.plan_id, p.name AS plan_name, \
             p.monthly_quota, s.units_used, s.period_start, s.period_end \
             FROM subscriptions s JOIN plans p ON p.id = s.plan_id \
             WHERE s.user_id = $1 AND now() >= s.period_start AND now() < s.period_end \
             ORDER BY s.period_start DESC LIMIT 1",
        )
        .bind(subject_id)
        .fetch_optional(self.router.reader())
        .await?;
        Ok(record)
    }

    /// Bump the usage counter for the subject's active subscription.
    pub async fn increment_usage(&self, subject_id: Uuid) -> Result<(), DataError> {
        sqlx::query(
            "UPDATE subscriptions SET units_used = units_used + 1 \
             WHERE user_id = $1 AND now() >= period_start AND now() < period_end",
        )
        .bind(subject_id)
        .execute(self.router.writer())
        .await?;
        Ok(())
    }
}

/// Object-safe subscription seam.
pub trait SubscriptionLedger: Send + Sync + 'static {
    fn active_for<'a>(
        &'a self,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SubscriptionRecord>, DataError>> + Send + 'a>>;

    fn increment_usage<'a>(
        &'a self,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<(), DataError>> + Send + 'a>>;
}

use std::future::Future;
use std::pin::Pin;

impl SubscriptionLedger for SubscriptionStore {
    fn active_for<'a>(
        &'a self,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SubscriptionRecord>, DataError>> + Send + 'a>>
    {
        Box::pin(SubscriptionStore::active_for(self, subject_id))
    }

    fn increment_usage<'a>(
        &'a self,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<(), DataError>> + Send + 'a>> {
        Box::pin(SubscriptionStore::increment_usage(self, subject_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(quota: Option<i64>, used: i64) -> SubscriptionRecord {
        SubscriptionRecord {
            id: Uuid::new_v4(),
            subject_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            plan_name: "free".into(),
            monthly_quota: quota,
            units_used: used,
            period_start: Utc::now(),
            period_end: Utc::now(),
        }
    }

    #[test]
    fn quota_boundary() {
        assert!(!record(Some(10), 9).quota_exhausted());
        assert!(record(Some(10), 10).quota_exhausted());
        assert!(record(Some(10), 11).quota_exhausted());
    }

    #[test]
    fn null_quota_is_unlimited() {
        assert!(!record(None, 1_000_000).quota_exhausted());
    }
}
