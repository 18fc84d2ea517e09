//! Per-endpoint-class CORS policy.
//!
//! Four classes with independent allow-lists, derived from the deployment
//! environment tag: dev allows any origin, staging/prod enforce the
//! configured origin list. Credentialed classes never combine with a
//! wildcard origin.

use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::EnvTag;

/// Endpoint class as far as CORS is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    /// Login, registration, plan listing, health.
    Public,
    /// The authenticated user API.
    Api,
    /// Service-to-service endpoints guarded by the shared secret.
    Internal,
    /// Metrics and health detail.
    Observability,
}

fn origins(env: EnvTag, allowed: &[String]) -> AllowOrigin {
    if env.is_dev() {
        return AllowOrigin::mirror_request();
    }
    let list: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    AllowOrigin::list(list)
}

/// Build the CORS layer for one endpoint class.
pub fn layer(class: EndpointClass, env: EnvTag, allowed: &[String]) -> CorsLayer {
    let request_id = HeaderName::from_static("x-request-id");
    let correlation = HeaderName::from_static("x-correlation-id");
    match class {
        EndpointClass::Public => CorsLayer::new()
            .allow_origin(origins(env, allowed))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE])
            .expose_headers([request_id, correlation])
            .max_age(Duration::from_secs(3_600)),
        EndpointClass::Api => CorsLayer::new()
            .allow_origin(origins(env, allowed))
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([CONTENT_TYPE, AUTHORIZATION, request_id.clone()])
            .expose_headers([
                request_id,
                correlation,
                HeaderName::from_static("x-ratelimit-minute"),
                HeaderName::from_static("x-ratelimit-hour"),
                HeaderName::from_static("x-ratelimit-day"),
                HeaderName::from_static("retry-after"),
            ])
            .allow_credentials(true)
            .max_age(Duration::from_secs(1_800)),
        EndpointClass::Internal => CorsLayer::new()
            .allow_origin(origins(env, allowed))
            .allow_methods([Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE, HeaderName::from_static("x-internal-api-key")])
            .max_age(Duration::from_secs(300)),
        EndpointClass::Observability => CorsLayer::new()
            .allow_origin(origins(env, allowed))
            .allow_methods([Method::GET])
            .max_age(Duration::from_secs(86_400)),
    }
}
