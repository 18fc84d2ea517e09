//! Filter-chain stages owned by the auth layer: bearer authentication and
//! the internal-service shared-secret guard.
//!
//! Bearer auth attaches an [`AuthContext`] to the request when a valid
//! token is presented; a missing or invalid token leaves the request
//! unauthenticated and the extractor rejects it at the protected handler.

use std::ops::Deref;
use std::sync::Arc;

use axum::extract::{FromRequestParts, OptionalFromRequestParts, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Router;
use uuid::Uuid;

use applygate_core::types::{Role, Subject};
use applygate_core::{ApiError, TraceContext};

use crate::token::TokenService;

pub const INTERNAL_KEY_HEADER: &str = "x-internal-api-key";

/// The authenticated principal for this request.
///
/// Present in request extensions once bearer auth (or the internal guard)
/// has accepted the credentials. Using it as an extractor rejects
/// unauthenticated requests with a 401.
#[derive(Debug, Clone)]
pub struct AuthContext(pub Subject);

impl Deref for AuthContext {
    type Target = Subject;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation = parts
            .extensions
            .get::<TraceContext>()
            .map(|c| c.correlation_id.clone());
        parts.extensions.get::<AuthContext>().cloned().ok_or_else(|| {
            let err = ApiError::auth("authentication required");
            match correlation {
                Some(id) => err.with_correlation(id),
                None => err,
            }
        })
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for AuthContext {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<AuthContext>().cloned())
    }
}

fn bearer_token(req: &Request) -> Option<String> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Layer bearer authentication onto a router. Verification failures are
/// logged and the request proceeds unauthenticated.
pub fn apply_bearer(router: Router, tokens: Arc<TokenService>) -> Router {
    router.layer(axum::middleware::from_fn(move |mut req: Request, next: Next| {
        let tokens = tokens.clone();
        async move {
            if let Some(token) = bearer_token(&req) {
                match tokens.verify(&token).await {
                    Ok(subject) => {
                        req.extensions_mut().insert(AuthContext(subject));
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "bearer token rejected");
                    }
                }
            }
            next.run(req).await
        }
    }))
}

/// The synthetic subject attached to requests admitted by the internal
/// guard.
pub fn internal_subject() -> Subject {
    Subject {
        id: Uuid::nil(),
        principal: "internal-service".into(),
        roles: vec![Role::InternalService],
    }
}

/// Guard an internal-only router: the shared-secret header must match or
/// the request is rejected with 403.
pub fn apply_internal_guard(router: Router, key: Arc<String>) -> Router {
    router.layer(axum::middleware::from_fn(move |mut req: Request, next: Next| {
        let key = key.clone();
        async move {
            let supplied = req
                .headers()
                .get(INTERNAL_KEY_HEADER)
                .and_then(|v| v.to_str().ok());
            match supplied {
                Some(supplied) if constant_time_eq(supplied.as_bytes(), key.as_bytes()) => {
                    req.extensions_mut().insert(AuthContext(internal_subject()));
                    next.run(req).await
                }
                _ => {
                    let correlation = req
                        .extensions()
                        .get::<TraceContext>()
                        .map(|c| c.correlation_id.clone());
                    let err = ApiError::forbidden("internal endpoint");
                    let err = match correlation {
                        Some(id) => err.with_correlation(id),
                        None => err,
                    };
                    err.into_response()
                }
            }
        }
    }))
}

/// Length-safe comparison; avoids early-exit timing on the shared secret.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Require a role on the extracted context.
pub fn require_role(ctx: &AuthContext, role: Role) -> Result<(), ApiError> {
    if ctx.has_role(role) {
        Ok(())
    } else {
        Err(ApiError::forbidden("insufficient role"))
    }
}
