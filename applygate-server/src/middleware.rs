//! Server-side filter-chain stages: the per-subject rate limit.
//!
//! Runs after bearer auth on the user-API group. Unauthenticated
//! requests pass through untouched (the protected handlers reject them);
//! authenticated ones are counted and stamped with `X-RateLimit-*`
//! headers, and denials carry `Retry-After`.

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Router;

use applygate_auth::AuthContext;
use applygate_core::{ApiError, TraceContext};
use applygate_limit::{RateLimitDecision, SlidingWindowLimiter, WindowCounts};

fn stamp_counts(response: &mut Response, counts: WindowCounts) {
    let pairs = [
        ("x-ratelimit-minute", counts.minute),
        ("x-ratelimit-hour", counts.hour),
        ("x-ratelimit-day", counts.day),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(name), value);
        }
    }
}

pub fn apply_rate_limit(router: Router, limiter: SlidingWindowLimiter) -> Router {
    router.layer(axum::middleware::from_fn(move |req: Request, next: Next| {
        let limiter = limiter.clone();
        async move {
            let Some(ctx) = req.extensions().get::<AuthContext>().cloned() else {
                return next.run(req).await;
            };
            let correlation = req
                .extensions()
                .get::<TraceContext>()
                .map(|t| t.correlation_id.clone());

            match limiter.check(&ctx.id.to_string()).await {
                RateLimitDecision::Allowed { counts } => {
                    let mut response = next.run(req).await;
                    stamp_counts(&mut response, counts);
                    response
                }
                RateLimitDecision::Denied { counts, retry_after_secs } => {
                    let err = ApiError::rate_limited(retry_after_secs);
                    let err = match correlation {
                        Some(id) => err.with_correlation(id),
                        None => err,
                    };
                    let mut response = err.into_response();
                    stamp_counts(&mut response, counts);
                    response
                }
                RateLimitDecision::Degraded => next.run(req).await,
            }
        }
    }))
}
