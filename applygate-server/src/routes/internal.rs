//! Internal status injection, guarded by the shared-secret header.
//!
//! Gives trusted internal services (and operators) a broker-free path to
//! push a status event through the same hub pipeline the consumer uses.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use applygate_auth::middleware::require_role;
use applygate_auth::AuthContext;
use applygate_core::types::{JobStatus, Role, StatusEvent};
use applygate_core::{ApiError, TraceContext};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InjectStatusRequest {
    #[serde(rename = "jobId")]
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default, rename = "artifactRef")]
    pub artifact_ref: Option<String>,
}

pub async fn inject_status(
    State(state): State<AppState>,
    ctx: AuthContext,
    trace: TraceContext,
    Json(request): Json<InjectStatusRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&ctx, Role::InternalService)?;

    let event = StatusEvent {
        job_id: request.job_id,
        status: request.status,
        timestamp: Utc::now(),
        progress: request.payload,
        artifact_ref: request.artifact_ref,
    };

    state.hub.handle_broker_event(event).await.map_err(|reason| {
        ApiError::internal(format!("status apply failed: {reason}"))
            .with_correlation(trace.correlation_id.clone())
    })?;

    Ok(Json(serde_json::json!({ "accepted": true })))
}
