//! Liveness/readiness probes.
//!
//! Components register a [`HealthIndicator`]; the registry aggregates them
//! under `GET /health`, with `/health/live` always-200 and
//! `/health/ready` gated on readiness-affecting checks.

use std::sync::Arc;
use std::time::Instant;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

/// Result of a single health check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down(String),
}

impl HealthStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, HealthStatus::Up)
    }
}

/// A named health indicator.
pub trait HealthIndicator: Send + Sync + 'static {
    /// The name of this check (e.g. `"db-primary"`, `"broker"`).
    fn name(&self) -> &str;

    fn check(&self) -> impl std::future::Future<Output = HealthStatus> + Send;

    /// Whether this check gates the readiness probe (default: `true`).
    fn affects_readiness(&self) -> bool {
        true
    }
}

/// Object-safe wrapper for [`HealthIndicator`].
#[doc(hidden)]
pub trait HealthIndicatorErased: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn check(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = HealthStatus> + Send + '_>>;
    fn affects_readiness(&self) -> bool;
}

impl<T: HealthIndicator> HealthIndicatorErased for T {
    fn name(&self) -> &str {
        HealthIndicator::name(self)
    }

    fn check(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = HealthStatus> + Send + '_>> {
        Box::pin(HealthIndicator::check(self))
    }

    fn affects_readiness(&self) -> bool {
        HealthIndicator::affects_readiness(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub checks: Vec<HealthCheck>,
    pub uptime_seconds: u64,
}

/// Registry of health indicators, assembled once at startup.
pub struct HealthRegistry {
    checks: Vec<Box<dyn HealthIndicatorErased>>,
    start_time: Instant,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn register<H: HealthIndicator>(mut self, indicator: H) -> Self {
        self.checks.push(Box::new(indicator));
        self
    }

    async fn aggregate(&self, readiness_only: bool) -> HealthResponse {
        let mut checks = Vec::with_capacity(self.checks.len());
        let mut all_up = true;

        for indicator in &self.checks {
            if readiness_only && !indicator.affects_readiness() {
                continue;
            }
            let start = Instant::now();
            let status = indicator.check().await;
            let duration_ms = start.elapsed().as_millis() as u64;
            let (status_str, reason) = match status {
                HealthStatus::Up => ("UP", None),
                HealthStatus::Down(reason) => {
                    all_up = false;
                    ("DOWN", Some(reason))
                }
            };
            checks.push(HealthCheck {
                name: indicator.name().to_string(),
                status: status_str,
                reason,
                duration_ms,
            });
        }

        HealthResponse {
            status: if all_up { "UP" } else { "DOWN" },
            checks,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Build the `/health`, `/health/live`, `/health/ready` router.
    pub fn into_router(self) -> Router {
        let registry = Arc::new(self);
        Router::new()
            .route(
                "/health",
                get({
                    let registry = registry.clone();
                    move || {
                        let registry = registry.clone();
                        async move { respond(registry.aggregate(false).await) }
                    }
                }),
            )
            .route("/health/live", get(|| async { (axum::http::StatusCode::OK, "OK") }))
            .route(
                "/health/ready",
                get(move || {
                    let registry = registry.clone();
                    async move { respond(registry.aggregate(true).await) }
                }),
            )
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn respond(response: HealthResponse) -> axum::response::Response {
    let status = if response.status == "UP" {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };
    (status, axum::Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct Fixed {
        name: &'static str,
        up: bool,
        readiness: bool,
    }

    impl HealthIndicator for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(&self) -> HealthStatus {
            if self.up {
                HealthStatus::Up
            } else {
                HealthStatus::Down("fixture down".into())
            }
        }

        fn affects_readiness(&self) -> bool {
            self.readiness
        }
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn aggregates_down_to_503() {
        let app = HealthRegistry::new()
            .register(Fixed { name: "db", up: true, readiness: true })
            .register(Fixed { name: "broker", up: false, readiness: true })
            .into_router();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 503);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "DOWN");
        assert_eq!(json["checks"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn liveness_ignores_failing_checks() {
        let app = HealthRegistry::new()
            .register(Fixed { name: "db", up: false, readiness: true })
            .into_router();
        let resp = app
            .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn readiness_skips_liveness_only_checks() {
        let app = HealthRegistry::new()
            .register(Fixed { name: "db", up: true, readiness: true })
            .register(Fixed { name: "disk", up: false, readiness: false })
            .into_router();
        let resp = app
            .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let json = body_json(resp).await;
        assert_eq!(json["checks"].as_array().unwrap().len(), 1);
    }
}
