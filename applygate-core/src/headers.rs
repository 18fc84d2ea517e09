//! Security response headers.
//!
//! Every response is stamped with clickjacking, MIME-sniff, XSS and
//! referrer protections; HSTS is added when the deployment terminates TLS.
//! Endpoint groups serving sensitive data additionally get `no-store`
//! cache directives.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::Router;

pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    pub fn builder() -> SecurityHeadersBuilder {
        SecurityHeadersBuilder::new()
    }

    /// The standard header set for every response.
    pub fn standard(hsts: bool) -> Self {
        SecurityHeadersBuilder::new().hsts(hsts).build()
    }

    /// The standard set plus `Cache-Control: no-store` for endpoints that
    /// serve per-user data.
    pub fn sensitive(hsts: bool) -> Self {
        SecurityHeadersBuilder::new().hsts(hsts).no_store(true).build()
    }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    /// Layer the header stamping onto a router.
    pub fn apply(self, router: Router) -> Router {
        let headers = Arc::new(self.headers);
        router.layer(axum::middleware::from_fn(move |req: Request, next: Next| {
            let headers = headers.clone();
            async move {
                let mut response = next.run(req).await;
                for (name, value) in headers.iter() {
                    response.headers_mut().insert(name.clone(), value.clone());
                }
                response
            }
        }))
    }
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self::standard(true)
    }
}

pub struct SecurityHeadersBuilder {
    frame_options: Option<String>,
    content_type_options: bool,
    xss_protection: bool,
    referrer_policy: Option<String>,
    hsts: bool,
    hsts_max_age: u64,
    no_store: bool,
}

impl SecurityHeadersBuilder {
    fn new() -> Self {
        Self {
            frame_options: Some("DENY".to_string()),
            content_type_options: true,
            xss_protection: true,
            referrer_policy: Some("strict-origin-when-cross-origin".to_string()),
            hsts: true,
            hsts_max_age: 31_536_000,
            no_store: false,
        }
    }

    /// Set the `X-Frame-Options` value (e.g. `"DENY"`, `"SAMEORIGIN"`).
    pub fn frame_options(mut self, value: impl Into<String>) -> Self {
        self.frame_options = Some(value.into());
        self
    }

    /// Enable or disable `Strict-Transport-Security`. Only meaningful on
    /// TLS-terminating deployments.
    pub fn hsts(mut self, enabled: bool) -> Self {
        self.hsts = enabled;
        self
    }

    pub fn hsts_max_age(mut self, seconds: u64) -> Self {
        self.hsts_max_age = seconds;
        self
    }

    /// Stamp `Cache-Control: no-store` and `Pragma: no-cache`.
    pub fn no_store(mut self, enabled: bool) -> Self {
        self.no_store = enabled;
        self
    }

    pub fn referrer_policy(mut self, value: impl Into<String>) -> Self {
        self.referrer_policy = Some(value.into());
        self
    }

    pub fn build(self) -> SecurityHeaders {
        let mut headers = Vec::new();

        if self.content_type_options {
            headers.push((
                HeaderName::from_static("x-content-type-options"),
                HeaderValue::from_static("nosniff"),
            ));
        }
        if let Some(ref fo) = self.frame_options {
            if let Ok(val) = HeaderValue::from_str(fo) {
                headers.push((HeaderName::from_static("x-frame-options"), val));
            }
        }
        if self.xss_protection {
            headers.push((
                HeaderName::from_static("x-xss-protection"),
                HeaderValue::from_static("0"),
            ));
        }
        if let Some(ref rp) = self.referrer_policy {
            if let Ok(val) = HeaderValue::from_str(rp) {
                headers.push((HeaderName::from_static("referrer-policy"), val));
            }
        }
        if self.hsts {
            let value = format!("max-age={}; includeSubDomains", self.hsts_max_age);
            if let Ok(val) = HeaderValue::from_str(&value) {
                headers.push((HeaderName::from_static("strict-transport-security"), val));
            }
        }
        if self.no_store {
            headers.push((
                HeaderName::from_static("cache-control"),
                HeaderValue::from_static("no-store, no-cache, must-revalidate"),
            ));
            headers.push((
                HeaderName::from_static("pragma"),
                HeaderValue::from_static("no-cache"),
            ));
        }

        SecurityHeaders { headers }
    }
}
