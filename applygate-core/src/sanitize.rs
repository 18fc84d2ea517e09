//! Request sanitation stage.
//!
//! Rejects obviously hostile or malformed requests before any handler
//! runs: over-long URLs and headers, path traversal, SQL-injection and
//! cross-site-scripting signatures (matched case-insensitively after
//! percent-decoding), and known scanner user agents. Body length is
//! capped; one byte over the cap is a 413. Health endpoints bypass the
//! whole stage.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;

use crate::error::ApiError;
use crate::trace::TraceContext;

const SQLI_SIGNATURES: &[&str] = &[
    "union select",
    "' or '1'='1",
    "or 1=1",
    "; drop table",
    "; delete from",
    "information_schema",
    "xp_cmdshell",
    "sleep(",
    "benchmark(",
    "load_file(",
];

const XSS_SIGNATURES: &[&str] = &[
    "<script",
    "</script",
    "javascript:",
    "onerror=",
    "onload=",
    "<iframe",
    "srcdoc=",
    "document.cookie",
    "eval(",
];

const TRAVERSAL_SIGNATURES: &[&str] = &["../", "..\\", "/etc/passwd", "c:\\windows"];

const SCANNER_AGENTS: &[&str] = &[
    "sqlmap", "nikto", "nmap", "masscan", "acunetix", "nessus", "dirbuster", "wpscan", "zgrab",
];

#[derive(Debug, Clone)]
pub struct SanitizeConfig {
    pub max_body_bytes: usize,
    pub max_url_len: usize,
    pub max_header_len: usize,
    /// Path prefixes that bypass sanitation entirely.
    pub bypass_prefixes: Vec<String>,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024,
            max_url_len: 2_048,
            max_header_len: 8_192,
            bypass_prefixes: vec!["/health".into(), "/metrics".into()],
        }
    }
}

/// Percent-decode the common escape sequences and lowercase, so signature
/// matching can't be defeated by `%3Cscript` style encoding.
fn normalise(value: &str) -> String {
    let decoded: String = form_urlencoded::parse(format!("v={value}").as_bytes())
        .map(|(_, v)| v.into_owned())
        .collect();
    decoded.to_ascii_lowercase()
}

fn matches_any(value: &str, signatures: &[&str]) -> bool {
    signatures.iter().any(|sig| value.contains(sig))
}

fn hostile(value: &str) -> Option<&'static str> {
    let normalised = normalise(value);
    if matches_any(&normalised, TRAVERSAL_SIGNATURES) {
        return Some("path traversal");
    }
    if matches_any(&normalised, SQLI_SIGNATURES) {
        return Some("sql injection");
    }
    if matches_any(&normalised, XSS_SIGNATURES) {
        return Some("cross-site scripting");
    }
    None
}

fn reject(ctx: &TraceContext, reason: &str) -> Response {
    tracing::warn!(correlation_id = %ctx.correlation_id, reason, "request rejected by sanitation");
    ApiError::validation("request rejected")
        .with_correlation(ctx.correlation_id.clone())
        .into_response()
}

async fn sanitize(cfg: Arc<SanitizeConfig>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if cfg.bypass_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
        return next.run(req).await;
    }

    let ctx = req
        .extensions()
        .get::<TraceContext>()
        .cloned()
        .unwrap_or_else(TraceContext::mint);

    // URL length and content checks.
    let uri = req.uri().to_string();
    if uri.len() > cfg.max_url_len {
        return reject(&ctx, "url too long");
    }
    if let Some(reason) = hostile(&path) {
        return reject(&ctx, reason);
    }
    if let Some(query) = req.uri().query() {
        if let Some(reason) = hostile(query) {
            return reject(&ctx, reason);
        }
    }

    // Declared body length. The enforced axum body limit backstops
    // requests that lie about it.
    if let Some(len) = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
    {
        if len > cfg.max_body_bytes {
            return ApiError::payload_too_large("request body exceeds limit")
                .with_correlation(ctx.correlation_id.clone())
                .into_response();
        }
    }

    // Header checks: sizes, hostile values, scanner fingerprints.
    for (name, value) in req.headers() {
        let Ok(value) = value.to_str() else { continue };
        if value.len() > cfg.max_header_len {
            return reject(&ctx, "header too long");
        }
        if name == USER_AGENT {
            let ua = value.to_ascii_lowercase();
            if SCANNER_AGENTS.iter().any(|s| ua.contains(s)) {
                return reject(&ctx, "scanner user agent");
            }
        }
        if name != axum::http::header::COOKIE && hostile(value).is_some() {
            return reject(&ctx, "hostile header value");
        }
    }

    // Form bodies are buffered (they are small and already capped) so the
    // decoded field values can be screened like query parameters.
    let is_form = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);

    if is_form {
        let (parts, body) = req.into_parts();
        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => Bytes::new(),
        };
        if bytes.len() > cfg.max_body_bytes {
            return ApiError::payload_too_large("request body exceeds limit")
                .with_correlation(ctx.correlation_id.clone())
                .into_response();
        }
        for (key, value) in form_urlencoded::parse(&bytes) {
            if hostile(&key).is_some() || hostile(&value).is_some() {
                return reject(&ctx, "hostile form value");
            }
        }
        let req = Request::from_parts(parts, Body::from(bytes));
        return next.run(req).await;
    }

    next.run(req).await
}

/// Layer the sanitation stage (plus the enforced body limit) onto a router.
pub fn apply(router: Router, cfg: SanitizeConfig) -> Router {
    let limit = cfg.max_body_bytes;
    let cfg = Arc::new(cfg);
    router
        .layer(axum::middleware::from_fn(move |req: Request, next: Next| {
            sanitize(cfg.clone(), req, next)
        }))
        .layer(axum::extract::DefaultBodyLimit::max(limit))
}
