//! Pre-signed upload URL endpoint.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use applygate_auth::AuthContext;
use applygate_core::{ApiError, TraceContext};

use crate::state::AppState;
use crate::uploads::PresignedUpload;

const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
];

#[derive(Debug, Deserialize, garde::Validate)]
pub struct PresignRequest {
    #[serde(rename = "fileName")]
    #[garde(length(min = 1, max = 255))]
    pub file_name: String,
    #[serde(rename = "contentType")]
    #[garde(length(min = 1, max = 128))]
    pub content_type: String,
}

pub async fn presign(
    State(state): State<AppState>,
    ctx: AuthContext,
    trace: TraceContext,
    Json(request): Json<PresignRequest>,
) -> Result<Json<PresignedUpload>, ApiError> {
    use garde::Validate;
    request
        .validate()
        .map_err(|report| ApiError::validation(report.to_string()).with_correlation(trace.correlation_id.clone()))?;

    if !ALLOWED_CONTENT_TYPES.contains(&request.content_type.as_str()) {
        return Err(ApiError::validation("unsupported content type")
            .with_correlation(trace.correlation_id.clone()));
    }

    let upload = state
        .uploads
        .mint(ctx.id, &request.file_name, &request.content_type)
        .await
        .map_err(|err| err.with_correlation(trace.correlation_id.clone()))?;
    Ok(Json(upload))
}
