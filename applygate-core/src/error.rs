use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;

/// Stable error kinds carried on every error response.
///
/// The wire value of `error` in the response body is the kind string, so
/// clients can branch programmatically without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input failed a schema or rule check.
    Validation,
    /// Missing, invalid or expired credential.
    Auth,
    /// Authenticated but not permitted.
    Forbidden,
    /// Entity absent or not owned by the caller.
    NotFound,
    /// Optimistic-concurrency loss or illegal state for the operation.
    Conflict,
    /// Per-subject rate caps exceeded.
    RateLimited,
    /// Plan usage exceeded.
    Quota,
    /// Broker publish failed after retries.
    Dispatch,
    /// A downstream store, broker or cache is unreachable.
    Dependency,
    /// Unexpected failure; detail is logged, body stays generic.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::Quota => "quota",
            ErrorKind::Dispatch => "dispatch",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Quota => StatusCode::PAYMENT_REQUIRED,
            ErrorKind::Dispatch => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Dependency => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Downstream origin of a wrapped failure. Logged, never leaked to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Db,
    Cache,
    Broker,
    ObjectStore,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Db => "db",
            Origin::Cache => "cache",
            Origin::Broker => "broker",
            Origin::ObjectStore => "object-store",
        }
    }
}

/// The gateway-wide error type.
///
/// Every stage of the filter chain and every handler converges on this
/// type. The response body shape is
/// `{ error, status, timestamp, correlationId?, message? }` where `error`
/// is the stable [`ErrorKind`] string.
pub struct ApiError {
    kind: ErrorKind,
    status: StatusCode,
    message: String,
    origin: Option<Origin>,
    correlation_id: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    headers: Vec<(HeaderName, HeaderValue)>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: kind.status(),
            kind,
            message: message.into(),
            origin: None,
            correlation_id: None,
            source: None,
            headers: Vec::new(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Validation failure for an over-sized payload; reported as 413.
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::Validation, message);
        err.status = StatusCode::PAYLOAD_TOO_LARGE;
        err
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::new(ErrorKind::RateLimited, "rate limit exceeded")
            .with_header("retry-after", retry_after_secs.to_string())
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Quota, message)
    }

    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Dispatch, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Wrap a downstream failure with its origin. The cause is kept for
    /// logging via `source()`; the client body stays generic.
    pub fn dependency(origin: Origin, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        let mut err = Self::new(
            ErrorKind::Dependency,
            format!("{} unavailable", origin.as_str()),
        );
        err.origin = Some(origin);
        err.source = Some(Box::new(cause));
        err
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_header(mut self, name: &'static str, value: impl AsRef<str>) -> Self {
        if let Ok(value) = HeaderValue::from_str(value.as_ref()) {
            self.headers.push((HeaderName::from_static(name), value));
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn origin(&self) -> Option<Origin> {
        self.origin
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.origin {
            Some(origin) => write!(f, "{} ({}): {}", self.kind.as_str(), origin.as_str(), self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

impl std::fmt::Debug for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| &**e as &(dyn std::error::Error + 'static))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Internal errors keep their detail in the log only.
        let message = match self.kind {
            ErrorKind::Internal => None,
            _ if self.message.is_empty() => None,
            _ => Some(self.message.clone()),
        };

        if self.kind == ErrorKind::Internal || self.kind == ErrorKind::Dependency {
            tracing::error!(
                kind = self.kind.as_str(),
                origin = self.origin.map(|o| o.as_str()),
                correlation_id = self.correlation_id.as_deref(),
                error = %self,
                cause = self.source.as_deref().map(tracing::field::display),
                "request failed",
            );
        }

        let mut body = serde_json::json!({
            "error": self.kind.as_str(),
            "status": self.status.as_u16(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(message) = message {
            body["message"] = serde_json::Value::String(message);
        }
        if let Some(ref correlation_id) = self.correlation_id {
            body["correlationId"] = serde_json::Value::String(correlation_id.clone());
        }

        let mut response = (self.status, Json(body)).into_response();
        for (name, value) in self.headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn error_parts(err: ApiError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn kind_string_is_the_wire_error() {
        let (status, body) = error_parts(ApiError::quota("monthly quota exhausted")).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"], "quota");
        assert_eq!(body["status"], 402);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn internal_body_is_generic() {
        let (status, body) = error_parts(ApiError::internal("pool exploded at line 42")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal");
        assert!(body.get("message").is_none(), "internal detail must not leak");
    }

    #[tokio::test]
    async fn dependency_hides_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "tcp 5672 refused");
        let err = ApiError::dependency(Origin::Broker, cause);
        assert_eq!(err.origin(), Some(Origin::Broker));
        let (status, body) = error_parts(err).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "dependency");
        let message = body["message"].as_str().unwrap_or("");
        assert!(!message.contains("5672"), "cause must not leak: {message}");
    }

    #[tokio::test]
    async fn rate_limited_carries_retry_after() {
        let resp = ApiError::rate_limited(60).into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get("retry-after").unwrap(), "60");
    }

    #[tokio::test]
    async fn correlation_id_round_trips() {
        let (_, body) = error_parts(ApiError::not_found("job").with_correlation("abc123")).await;
        assert_eq!(body["correlationId"], "abc123");
    }

    #[tokio::test]
    async fn payload_too_large_is_413_validation() {
        let err = ApiError::payload_too_large("body exceeds cap");
        assert_eq!(err.kind(), ErrorKind::Validation);
        let (status, body) = error_parts(err).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "validation");
        assert_eq!(body["status"], 413);
    }

    #[test]
    fn display_includes_origin() {
        let cause = std::io::Error::other("down");
        let err = ApiError::dependency(Origin::Db, cause);
        assert_eq!(err.to_string(), "dependency (db): db unavailable");
    }
}
