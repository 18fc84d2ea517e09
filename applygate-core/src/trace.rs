//! Correlation-id propagation.
//!
//! Every request gets a 128-bit correlation id (read from
//! `X-Correlation-Id` when a caller supplies one, minted otherwise) plus a
//! fresh per-request span id. Both live on the request extensions, are
//! recorded on the request's tracing span, and are mirrored back as
//! response headers so the client can quote them.

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const SPAN_ID_HEADER: &str = "x-span-id";

/// Per-request trace identity, available as an extractor in any handler.
#[derive(Debug, Clone)]
pub struct TraceContext {
    /// 128-bit correlation id, hex without hyphens. Shared across retries
    /// and downstream calls of one logical operation.
    pub correlation_id: String,
    /// 64-bit span id, fresh per request.
    pub span_id: String,
}

impl TraceContext {
    pub fn mint() -> Self {
        let correlation_id = Uuid::new_v4().simple().to_string();
        Self {
            span_id: span_id_from(&correlation_id),
            correlation_id,
        }
    }

    /// Read the caller-supplied correlation id when it looks sane,
    /// mint a fresh one otherwise.
    pub fn from_request<B>(req: &axum::http::Request<B>) -> Self {
        let supplied = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| is_valid_correlation_id(v));
        match supplied {
            Some(id) => {
                let correlation_id = id.to_ascii_lowercase();
                Self {
                    span_id: Uuid::new_v4().simple().to_string()[..16].to_string(),
                    correlation_id,
                }
            }
            None => Self::mint(),
        }
    }
}

fn span_id_from(correlation_id: &str) -> String {
    correlation_id[..16.min(correlation_id.len())].to_string()
}

fn is_valid_correlation_id(value: &str) -> bool {
    (8..=64).contains(&value.len()) && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

impl<S: Send + Sync> FromRequestParts<S> for TraceContext {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<TraceContext>()
            .cloned()
            .unwrap_or_else(TraceContext::mint))
    }
}

/// Middleware: attach a [`TraceContext`], run the request inside an
/// instrumented span, mirror the ids onto the response, and emit the
/// per-request access log line.
pub async fn trace_context_middleware(mut req: Request, next: Next) -> Response {
    let ctx = TraceContext::from_request(&req);
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    req.extensions_mut().insert(ctx.clone());

    let span = tracing::info_span!(
        "request",
        correlation_id = %ctx.correlation_id,
        span_id = %ctx.span_id,
        method = %method,
        path = %path,
    );

    let start = Instant::now();
    let mut response = next.run(req).instrument(span).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        correlation_id = %ctx.correlation_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms,
        "handled",
    );

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&ctx.correlation_id) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value.clone());
        headers.insert(HeaderName::from_static(CORRELATION_ID_HEADER), value);
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.span_id) {
        headers.insert(HeaderName::from_static(SPAN_ID_HEADER), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/echo",
                get(|ctx: TraceContext| async move { ctx.correlation_id }),
            )
            .layer(axum::middleware::from_fn(trace_context_middleware))
    }

    #[tokio::test]
    async fn mints_and_mirrors_ids() {
        let resp = app()
            .oneshot(Request::builder().uri("/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let request_id = resp.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert_eq!(request_id.len(), 32);
        assert_eq!(
            resp.headers().get(CORRELATION_ID_HEADER).unwrap().to_str().unwrap(),
            request_id,
        );
    }

    #[tokio::test]
    async fn propagates_supplied_correlation_id() {
        use http_body_util::BodyExt;
        let resp = app()
            .oneshot(
                Request::builder()
                    .uri("/echo")
                    .header(CORRELATION_ID_HEADER, "cafebabe-12345678")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            resp.headers().get(REQUEST_ID_HEADER).unwrap(),
            "cafebabe-12345678",
        );
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"cafebabe-12345678");
    }

    #[tokio::test]
    async fn rejects_garbage_correlation_id() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .uri("/echo")
                    .header(CORRELATION_ID_HEADER, "x")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let minted = resp.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert_ne!(minted, "x");
        assert_eq!(minted.len(), 32);
    }
}
