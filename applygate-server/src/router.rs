//! Router assembly: endpoint groups with their CORS class and header
//! policy, wrapped by the shared filter-chain stages in order — metrics
//! and trace outermost, then sanitation, then security headers, with
//! bearer auth ahead of the per-group guards.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use applygate_auth::{apply_bearer, apply_internal_guard};
use applygate_core::cors::{self, EndpointClass};
use applygate_core::headers::SecurityHeaders;
use applygate_core::health::HealthRegistry;
use applygate_core::metrics::{metrics_handler, MetricsLayer};
use applygate_core::sanitize::{self, SanitizeConfig};
use applygate_core::trace::trace_context_middleware;

use crate::middleware::apply_rate_limit;
use crate::routes;
use crate::state::AppState;

/// Build the complete application router. Health indicators are passed
/// in because their wiring (pools, broker) belongs to the composition
/// root.
pub fn build_router(state: AppState, health: HealthRegistry) -> Router {
    let env = state.config.env;
    let origins = state.config.allowed_origins.clone();
    let hsts = !env.is_dev();

    // Public: registration, login.
    let public = Router::new()
        .route("/api/v1/auth/register", post(routes::auth::register))
        .route("/api/v1/auth/login", post(routes::auth::login))
        .with_state(state.clone())
        .layer(cors::layer(EndpointClass::Public, env, &origins));

    // Authenticated user API. Rate limiting sits inside bearer auth and
    // excludes the auth endpoints by construction (separate group).
    let api = Router::new()
        .route("/api/v1/uploads/presigned-url", post(routes::uploads::presign))
        .route(
            "/api/v1/applications",
            post(routes::applications::submit).get(routes::applications::list),
        )
        .route("/api/v1/applications/{job_id}", get(routes::applications::get_job))
        .route("/api/v1/applications/{job_id}/cancel", post(routes::applications::cancel))
        .route("/api/v1/applications/{job_id}/artifact", get(routes::applications::artifact))
        .route("/api/v1/applications/{job_id}/stream", get(routes::stream::stream))
        .route("/api/v1/dashboard/stats", get(routes::dashboard::stats))
        .with_state(state.clone());
    let api = apply_rate_limit(api, state.limiter.clone());
    let api = SecurityHeaders::sensitive(hsts)
        .apply(api)
        .layer(cors::layer(EndpointClass::Api, env, &origins));

    // Internal service surface, shared-secret guarded.
    let internal = Router::new()
        .route("/api/v1/internal/status", post(routes::internal::inject_status))
        .with_state(state.clone());
    let internal = apply_internal_guard(internal, Arc::new(state.config.internal_api_key.clone()))
        .layer(cors::layer(EndpointClass::Internal, env, &origins));

    // Observability.
    let observability = health
        .into_router()
        .route("/metrics", get(metrics_handler))
        .layer(cors::layer(EndpointClass::Observability, env, &origins));

    let app = Router::new()
        .merge(public)
        .merge(api)
        .merge(internal)
        .merge(observability);

    // Shared stages, innermost to outermost: bearer auth, security
    // headers, sanitation, trace context, metrics.
    let app = apply_bearer(app, state.tokens.clone());
    let app = SecurityHeaders::standard(hsts).apply(app);
    let app = sanitize::apply(
        app,
        SanitizeConfig {
            max_body_bytes: state.config.body_limit_bytes,
            ..SanitizeConfig::default()
        },
    );
    let app = app.layer(axum::middleware::from_fn(trace_context_middleware));
    app.layer(MetricsLayer::new())
}
