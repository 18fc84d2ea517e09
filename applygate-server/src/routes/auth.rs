//! Registration and login.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use applygate_auth::lockout::LockoutDecision;
use applygate_auth::password;
use applygate_core::{ApiError, TraceContext};

use crate::state::AppState;

#[derive(Debug, Deserialize, garde::Validate)]
pub struct CredentialsRequest {
    #[garde(email)]
    pub email: String,
    #[garde(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Client address for the brute-force guard. The gateway sits behind a
/// load balancer, so the forwarded header is the usable signal.
fn client_addr(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn register(
    State(state): State<AppState>,
    trace: TraceContext,
    Json(request): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    use garde::Validate;
    request
        .validate()
        .map_err(|report| ApiError::validation(report.to_string()).with_correlation(trace.correlation_id.clone()))?;

    let hash = password::hash(&request.password)?;
    let user = state.users.create(&request.email, &hash).await?;
    let token = state.tokens.issue(&user.subject())?;

    tracing::info!(subject = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

pub async fn login(
    State(state): State<AppState>,
    trace: TraceContext,
    headers: HeaderMap,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let addr = client_addr(&headers);

    if let LockoutDecision::Locked { retry_after_secs } =
        state.lockout.check(&request.email, &addr)
    {
        return Err(ApiError::rate_limited(retry_after_secs)
            .with_correlation(trace.correlation_id.clone()));
    }

    let user = state.users.find_by_email(&request.email).await?;
    let verified = match &user {
        Some(user) => password::verify(&user.password_hash, &request.password)?,
        // Burn comparable time so absent accounts are not distinguishable.
        None => {
            let _ = password::verify(
                "$argon2id$v=19$m=19456,t=2,p=1$YXBwbHlnYXRlc2FsdA$m0t3PnEjzVpnFqADe4/2TDEnjM0TBYpfkLTkmO9Kfbo",
                &request.password,
            );
            false
        }
    };

    if !verified {
        state.lockout.record_failure(&request.email, &addr);
        return Err(ApiError::auth("invalid email or password")
            .with_correlation(trace.correlation_id.clone()));
    }

    let user = user.expect("verified implies user present");
    state.lockout.record_success(&request.email, &addr);
    let token = state.tokens.issue(&user.subject())?;
    Ok(Json(TokenResponse { token }))
}
