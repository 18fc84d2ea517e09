//! Per-subject dashboard stats, cached five minutes in the distributed
//! tier.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use applygate_auth::AuthContext;
use applygate_core::ApiError;

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub usage: Option<UsageSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub plan: String,
    #[serde(rename = "unitsUsed")]
    pub units_used: i64,
    #[serde(rename = "monthlyQuota")]
    pub monthly_quota: Option<i64>,
}

pub async fn stats(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> Result<Json<DashboardStats>, ApiError> {
    let cache_key = format!("stats:{}", ctx.id);
    if let Some(cached) = state.dashboard_cache.get_json::<DashboardStats>(&cache_key).await {
        return Ok(Json(cached));
    }

    let counts = state.jobs.counts_by_status(ctx.id).await?;
    let mut stats = DashboardStats {
        total: 0,
        pending: 0,
        processing: 0,
        completed: 0,
        failed: 0,
        cancelled: 0,
        usage: None,
    };
    for (status, count) in counts {
        stats.total += count;
        match status.as_str() {
            "PENDING" => stats.pending = count,
            "PROCESSING" => stats.processing = count,
            "COMPLETED" => stats.completed = count,
            "FAILED" => stats.failed = count,
            "CANCELLED" => stats.cancelled = count,
            other => tracing::warn!(status = other, "unexpected status in counts"),
        }
    }

    stats.usage = state.quota.snapshot(ctx.id).await?.map(|s| UsageSnapshot {
        plan: s.plan_name,
        units_used: s.units_used,
        monthly_quota: s.monthly_quota,
    });

    state.dashboard_cache.set_json(&cache_key, &stats).await;
    Ok(Json(stats))
}
