//! The service graph, constructed once at startup and cloned into
//! handlers. No service locators; everything is wired by constructor.

use std::sync::Arc;

use applygate_auth::{LoginLockout, TokenService};
use applygate_cache::TieredCache;
use applygate_core::config::AppConfig;
use applygate_data::{JobStore, SubscriptionLedger, UserDirectory};
use applygate_limit::SlidingWindowLimiter;
use applygate_stream::StatusHub;

use crate::lifecycle::JobLifecycleService;
use crate::quota::QuotaService;
use crate::uploads::UploadUrlMinter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tokens: Arc<TokenService>,
    pub lockout: LoginLockout,
    pub users: Arc<dyn UserDirectory>,
    pub jobs: Arc<dyn JobStore>,
    pub subscriptions: Arc<dyn SubscriptionLedger>,
    pub limiter: SlidingWindowLimiter,
    pub hub: StatusHub,
    pub lifecycle: Arc<JobLifecycleService>,
    pub quota: Arc<QuotaService>,
    pub uploads: Arc<UploadUrlMinter>,
    pub dashboard_cache: TieredCache,
}
