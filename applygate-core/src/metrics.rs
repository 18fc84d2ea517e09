//! Prometheus metrics: HTTP request tracking plus component counters
//! (cache tiers, rate limiter degradation, dropped stream events,
//! publisher retries). Everything registers against the default registry
//! and is rendered by [`metrics_handler`].

use std::sync::OnceLock;
use std::time::Instant;

use http::{Request, Response};
use pin_project_lite::pin_project;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};

fn http_requests() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        prometheus::register_int_counter_vec!(
            "applygate_http_requests_total",
            "HTTP requests by method, path and status",
            &["method", "path", "status"]
        )
        .expect("register http_requests_total")
    })
}

fn http_duration() -> &'static HistogramVec {
    static METRIC: OnceLock<HistogramVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        prometheus::register_histogram_vec!(
            "applygate_http_request_duration_seconds",
            "HTTP request latency",
            &["method", "path"]
        )
        .expect("register http_request_duration_seconds")
    })
}

fn http_in_flight() -> &'static IntGauge {
    static METRIC: OnceLock<IntGauge> = OnceLock::new();
    METRIC.get_or_init(|| {
        prometheus::register_int_gauge!(
            "applygate_http_in_flight",
            "HTTP requests currently being served"
        )
        .expect("register http_in_flight")
    })
}

/// Cache hits/misses by cache name and tier; incremented at the access
/// sites in the tiered fabric.
pub fn cache_lookups() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        prometheus::register_int_counter_vec!(
            "applygate_cache_lookups_total",
            "Cache lookups by cache, tier and outcome",
            &["cache", "tier", "outcome"]
        )
        .expect("register cache_lookups_total")
    })
}

/// Incremented whenever the rate limiter fails open because the counter
/// store is unreachable.
pub fn rate_limiter_degraded() -> &'static IntCounter {
    static METRIC: OnceLock<IntCounter> = OnceLock::new();
    METRIC.get_or_init(|| {
        prometheus::register_int_counter!(
            "applygate_rate_limiter_degraded_total",
            "Rate-limit decisions made in fail-open mode"
        )
        .expect("register rate_limiter_degraded_total")
    })
}

/// Status events dropped because a subscriber buffer was full.
pub fn subscriber_events_dropped() -> &'static IntCounter {
    static METRIC: OnceLock<IntCounter> = OnceLock::new();
    METRIC.get_or_init(|| {
        prometheus::register_int_counter!(
            "applygate_subscriber_events_dropped_total",
            "Status events dropped on saturated subscriber buffers"
        )
        .expect("register subscriber_events_dropped_total")
    })
}

/// Broker publish retry attempts.
pub fn publish_retries() -> &'static IntCounter {
    static METRIC: OnceLock<IntCounter> = OnceLock::new();
    METRIC.get_or_init(|| {
        prometheus::register_int_counter!(
            "applygate_publish_retries_total",
            "Broker publish attempts beyond the first"
        )
        .expect("register publish_retries_total")
    })
}

/// Publishes that exhausted all attempts.
pub fn dispatch_failures() -> &'static IntCounter {
    static METRIC: OnceLock<IntCounter> = OnceLock::new();
    METRIC.get_or_init(|| {
        prometheus::register_int_counter!(
            "applygate_dispatch_failures_total",
            "Job dispatches that failed after retries"
        )
        .expect("register dispatch_failures_total")
    })
}

/// Current number of registered push-stream subscribers.
pub fn active_subscribers() -> &'static IntGauge {
    static METRIC: OnceLock<IntGauge> = OnceLock::new();
    METRIC.get_or_init(|| {
        prometheus::register_int_gauge!(
            "applygate_stream_subscribers",
            "Currently registered push-stream subscribers"
        )
        .expect("register stream_subscribers")
    })
}

/// Handler for `GET /metrics` — Prometheus text exposition format.
pub async fn metrics_handler() -> ([(&'static str, &'static str); 1], String) {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    let _ = encoder.encode(&families, &mut buffer);
    (
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        String::from_utf8(buffer).unwrap_or_default(),
    )
}

/// Tower layer tracking request count, latency and in-flight gauge.
#[derive(Clone, Default)]
pub struct MetricsLayer {
    _private: (),
}

impl MetricsLayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = MetricsFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let method = req.method().to_string();
        let path = normalize_path(req.uri().path());
        http_in_flight().inc();
        MetricsFuture {
            inner: self.inner.call(req),
            method,
            path,
            start: Instant::now(),
        }
    }
}

pin_project! {
    pub struct MetricsFuture<F> {
        #[pin]
        inner: F,
        method: String,
        path: String,
        start: Instant,
    }
}

impl<F, ResBody, E> Future for MetricsFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(result) => {
                http_in_flight().dec();
                let status = match &result {
                    Ok(response) => response.status().as_u16(),
                    Err(_) => 500,
                };
                http_requests()
                    .with_label_values(&[this.method, this.path, &status.to_string()])
                    .inc();
                http_duration()
                    .with_label_values(&[this.method, this.path])
                    .observe(this.start.elapsed().as_secs_f64());
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Collapse id-shaped path segments so metric cardinality stays bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.parse::<i64>().is_ok() || looks_like_id(segment) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn looks_like_id(s: &str) -> bool {
    (s.len() == 32 || s.len() == 36) && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}
