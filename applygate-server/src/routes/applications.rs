//! The applications API: submit, read, list, cancel, artifact.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use applygate_auth::AuthContext;
use applygate_core::types::JobStatus;
use applygate_core::{ApiError, TraceContext};
use applygate_data::{JobFilter, JobRecord, Page, Pageable};

use crate::lifecycle::SubmitRequest;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    #[serde(rename = "jobId")]
    pub job_id: Uuid,
}

pub async fn submit(
    State(state): State<AppState>,
    ctx: AuthContext,
    trace: TraceContext,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let job = state
        .lifecycle
        .submit(&ctx, &trace, request)
        .await
        .map_err(|err| err.with_correlation(trace.correlation_id.clone()))?;
    Ok((StatusCode::CREATED, Json(SubmitResponse { job_id: job.id })))
}

pub async fn get_job(
    State(state): State<AppState>,
    ctx: AuthContext,
    trace: TraceContext,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobRecord>, ApiError> {
    let job = state
        .jobs
        .get(job_id, ctx.id)
        .await
        .map_err(|err| ApiError::from(err).with_correlation(trace.correlation_id.clone()))?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u64>,
    pub size: Option<u64>,
    pub status: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    ctx: AuthContext,
    trace: TraceContext,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<JobRecord>>, ApiError> {
    let status = match params.status.as_deref() {
        Some(raw) => Some(
            raw.parse::<JobStatus>()
                .map_err(|e| ApiError::validation(e).with_correlation(trace.correlation_id.clone()))?,
        ),
        None => None,
    };
    let pageable = Pageable {
        page: params.page.unwrap_or(0),
        size: params.size.unwrap_or(20),
    };
    let page = state
        .jobs
        .list(ctx.id, JobFilter { status }, pageable)
        .await?;
    Ok(Json(page))
}

pub async fn cancel(
    State(state): State<AppState>,
    ctx: AuthContext,
    trace: TraceContext,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobRecord>, ApiError> {
    let job = state
        .lifecycle
        .cancel(&ctx, &trace, job_id)
        .await
        .map_err(|err| err.with_correlation(trace.correlation_id.clone()))?;
    Ok(Json(job))
}

#[derive(Debug, Serialize)]
pub struct ArtifactResponse {
    #[serde(rename = "artifactRef")]
    pub artifact_ref: String,
    pub meta: ArtifactMeta,
}

#[derive(Debug, Serialize)]
pub struct ArtifactMeta {
    #[serde(rename = "jobId")]
    pub job_id: Uuid,
    #[serde(rename = "modelProvider")]
    pub model_provider: String,
    #[serde(rename = "modelName")]
    pub model_name: String,
    #[serde(rename = "completedAt")]
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

/// The artifact reference for a completed job. The artifact body lives
/// in the object store; the gateway only indexes the key.
pub async fn artifact(
    State(state): State<AppState>,
    ctx: AuthContext,
    trace: TraceContext,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ArtifactResponse>, ApiError> {
    let job = state
        .jobs
        .get(job_id, ctx.id)
        .await
        .map_err(|err| ApiError::from(err).with_correlation(trace.correlation_id.clone()))?;

    if job.status != JobStatus::Completed {
        return Err(ApiError::conflict(format!("job is {}, artifact requires COMPLETED", job.status))
            .with_correlation(trace.correlation_id.clone()));
    }
    let artifact_ref = job
        .artifact_ref
        .ok_or_else(|| ApiError::internal("completed job missing artifact reference"))?;

    Ok(Json(ArtifactResponse {
        artifact_ref,
        meta: ArtifactMeta {
            job_id: job.id,
            model_provider: job.model_provider,
            model_name: job.model_name,
            completed_at: job.updated_at,
        },
    }))
}
