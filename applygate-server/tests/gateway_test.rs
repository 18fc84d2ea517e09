//! Router-level tests over in-memory backends: the full middleware chain
//! and handlers, with the broker, Postgres and Redis swapped out at
//! their trait seams.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use dashmap::DashMap;
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use applygate_auth::{LoginLockout, TokenService};
use applygate_cache::{InMemoryStore, TieredCache};
use applygate_core::config::{
    AppConfig, DbConfig, DispatchConfig, EnvTag, ObjectStoreConfig, RateLimitConfig, StreamConfig,
};
use applygate_core::types::JobStatus;
use applygate_data::{
    DataError, JobFilter, JobRecord, JobStore, NewJob, Page, Pageable, SubscriptionLedger,
    SubscriptionRecord, TransitionPatch, UserDirectory, UserRecord,
};
use applygate_dispatch::descriptor::CancelMessage;
use applygate_dispatch::{DispatchError, JobDescriptor};
use applygate_limit::{InMemoryCounterStore, RateLimits, SlidingWindowLimiter};
use applygate_server::dispatcher::Dispatcher;
use applygate_server::glue::{DirectorySubjectResolver, RepositoryStatusStore};
use applygate_server::lifecycle::JobLifecycleService;
use applygate_server::quota::QuotaService;
use applygate_server::uploads::UploadUrlMinter;
use applygate_server::{build_router, AppState};
use applygate_stream::{InMemoryRelay, StatusHub};

// ---------------------------------------------------------------------------
// In-memory backends
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemJobs {
    rows: DashMap<Uuid, JobRecord>,
}

impl JobStore for MemJobs {
    fn create<'a>(
        &'a self,
        new: NewJob,
    ) -> Pin<Box<dyn Future<Output = Result<JobRecord, DataError>> + Send + 'a>> {
        Box::pin(async move {
            let record = JobRecord {
                id: new.id,
                subject_id: new.subject_id,
                submitted_at: Utc::now(),
                jd_url: new.jd_url,
                resume_uri: new.resume_uri,
                model_provider: new.model_provider,
                model_name: new.model_name,
                status: JobStatus::Pending,
                priority: new.priority,
                version: 1,
                updated_at: Utc::now(),
                artifact_ref: None,
                failure_reason: None,
            };
            self.rows.insert(record.id, record.clone());
            Ok(record)
        })
    }

    fn get<'a>(
        &'a self,
        id: Uuid,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<JobRecord, DataError>> + Send + 'a>> {
        Box::pin(async move {
            self.rows
                .get(&id)
                .filter(|r| r.subject_id == subject_id)
                .map(|r| r.value().clone())
                .ok_or_else(|| DataError::NotFound(format!("job {id}")))
        })
    }

    fn get_current<'a>(
        &'a self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<JobRecord, DataError>> + Send + 'a>> {
        Box::pin(async move {
            self.rows
                .get(&id)
                .map(|r| r.value().clone())
                .ok_or_else(|| DataError::NotFound(format!("job {id}")))
        })
    }

    fn transition<'a>(
        &'a self,
        id: Uuid,
        expected_version: i64,
        from: JobStatus,
        to: JobStatus,
        patch: TransitionPatch,
    ) -> Pin<Box<dyn Future<Output = Result<JobRecord, DataError>> + Send + 'a>> {
        Box::pin(async move {
            assert!(from.can_transition_to(to), "illegal job transition {from} -> {to}");
            let mut row = self
                .rows
                .get_mut(&id)
                .ok_or_else(|| DataError::NotFound(format!("job {id}")))?;
            if row.version != expected_version || row.status != from {
                return Err(DataError::Conflict(format!(
                    "job {id} moved past version {expected_version}"
                )));
            }
            row.status = to;
            row.version += 1;
            row.updated_at = Utc::now();
            if let Some(artifact) = patch.artifact_ref {
                row.artifact_ref = Some(artifact);
            }
            if let Some(reason) = patch.failure_reason {
                row.failure_reason = Some(reason);
            }
            Ok(row.clone())
        })
    }

    fn list<'a>(
        &'a self,
        subject_id: Uuid,
        filter: JobFilter,
        pageable: Pageable,
    ) -> Pin<Box<dyn Future<Output = Result<Page<JobRecord>, DataError>> + Send + 'a>> {
        Box::pin(async move {
            let mut rows: Vec<JobRecord> = self
                .rows
                .iter()
                .filter(|r| r.subject_id == subject_id)
                .filter(|r| filter.status.map(|s| r.status == s).unwrap_or(true))
                .map(|r| r.value().clone())
                .collect();
            rows.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
            let total = rows.len() as u64;
            Ok(Page::new(rows, &pageable, total))
        })
    }

    fn count_for_subject<'a>(
        &'a self,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<u64, DataError>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self.rows.iter().filter(|r| r.subject_id == subject_id).count() as u64)
        })
    }

    fn counts_by_status<'a>(
        &'a self,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<(String, i64)>, DataError>> + Send + 'a>> {
        Box::pin(async move {
            let mut counts = std::collections::HashMap::new();
            for row in self.rows.iter().filter(|r| r.subject_id == subject_id) {
                *counts.entry(row.status.as_str().to_string()).or_insert(0i64) += 1;
            }
            Ok(counts.into_iter().collect())
        })
    }
}

#[derive(Default)]
struct MemUsers {
    by_email: DashMap<String, UserRecord>,
}

impl UserDirectory for MemUsers {
    fn create<'a>(
        &'a self,
        email: &'a str,
        password_hash: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UserRecord, DataError>> + Send + 'a>> {
        Box::pin(async move {
            if self.by_email.contains_key(email) {
                return Err(DataError::Conflict(format!("email {email} already registered")));
            }
            let record = UserRecord {
                id: Uuid::new_v4(),
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                roles: vec!["user".into()],
                created_at: Utc::now(),
            };
            self.by_email.insert(email.to_string(), record.clone());
            Ok(record)
        })
    }

    fn find_by_email<'a>(
        &'a self,
        email: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<UserRecord>, DataError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.by_email.get(email).map(|r| r.value().clone())) })
    }

    fn find_by_id<'a>(
        &'a self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<UserRecord>, DataError>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .by_email
                .iter()
                .find(|r| r.id == id)
                .map(|r| r.value().clone()))
        })
    }
}

struct MemLedger {
    subscription: std::sync::Mutex<Option<SubscriptionRecord>>,
    increments: AtomicUsize,
}

impl MemLedger {
    fn new(subscription: Option<SubscriptionRecord>) -> Self {
        Self {
            subscription: std::sync::Mutex::new(subscription),
            increments: AtomicUsize::new(0),
        }
    }
}

impl SubscriptionLedger for MemLedger {
    fn active_for<'a>(
        &'a self,
        _subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SubscriptionRecord>, DataError>> + Send + 'a>>
    {
        Box::pin(async move { Ok(self.subscription.lock().unwrap().clone()) })
    }

    fn increment_usage<'a>(
        &'a self,
        _subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<(), DataError>> + Send + 'a>> {
        Box::pin(async move {
            self.increments.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = self.subscription.lock().unwrap().as_mut() {
                sub.units_used += 1;
            }
            Ok(())
        })
    }
}

struct StubDispatcher {
    fail: bool,
    published: AtomicUsize,
}

impl StubDispatcher {
    fn ok() -> Self {
        Self { fail: false, published: AtomicUsize::new(0) }
    }

    fn failing() -> Self {
        Self { fail: true, published: AtomicUsize::new(0) }
    }
}

impl Dispatcher for StubDispatcher {
    fn dispatch<'a>(
        &'a self,
        _descriptor: &'a JobDescriptor,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail {
                return Err(DispatchError::RetriesExhausted { attempts: 3 });
            }
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn cancel<'a>(
        &'a self,
        _message: &'a CancelMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>> {
        Box::pin(async move { Ok(()) })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

const INTERNAL_KEY: &str = "internal-test-key";

fn test_config() -> AppConfig {
    AppConfig {
        env: EnvTag::Dev,
        bind_addr: "127.0.0.1:0".into(),
        db: DbConfig {
            primary_url: "postgres://unused.invalid/app".into(),
            replica_urls: vec![],
            read_strategy: "round-robin".into(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(1),
            statement_timeout: Duration::from_secs(60),
        },
        cache_url: None,
        dispatch: DispatchConfig {
            broker_url: "amqp://unused.invalid".into(),
            exchange: "jobs.exchange".into(),
            confirm_timeout: Duration::from_secs(30),
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            backpressure_wait: Duration::from_secs(1),
            shards_per_priority: 4,
            compress_threshold: 1024,
        },
        object_store: ObjectStoreConfig {
            endpoint: "http://localhost:9000".into(),
            bucket: "applygate-test".into(),
            region: "us-east-1".into(),
            access_key: Some("test-access".into()),
            secret_key: Some("test-secret".into()),
            presign_ttl: Duration::from_secs(3600),
        },
        token_secret: "gateway-test-secret-key-with-length".into(),
        token_ttl: Duration::from_secs(3600),
        internal_api_key: INTERNAL_KEY.into(),
        allowed_origins: vec![],
        rate_limit: RateLimitConfig { per_minute: 60, per_hour: 1_000, per_day: 5_000 },
        body_limit_bytes: 10 << 20,
        stream: StreamConfig {
            heartbeat: Duration::from_secs(30),
            max_life: Duration::from_secs(600),
            subscriber_buffer: 16,
        },
    }
}

struct Harness {
    app: Router,
    ledger: Arc<MemLedger>,
    jobs: Arc<MemJobs>,
}

async fn harness_with(
    dispatcher: Arc<dyn Dispatcher>,
    subscription: Option<SubscriptionRecord>,
    per_minute: u64,
) -> Harness {
    let config = Arc::new(test_config());
    let jobs: Arc<MemJobs> = Arc::new(MemJobs::default());
    let users: Arc<MemUsers> = Arc::new(MemUsers::default());
    let ledger = Arc::new(MemLedger::new(subscription));
    let l2 = Arc::new(InMemoryStore::new());

    let tokens = Arc::new(TokenService::new(
        config.token_secret.as_bytes(),
        config.token_ttl,
        Arc::new(DirectorySubjectResolver::new(users.clone())),
    ));
    let limiter = SlidingWindowLimiter::new(
        Arc::new(InMemoryCounterStore::new()),
        RateLimits { per_minute, per_hour: 1_000, per_day: 5_000 },
    );
    let hub = StatusHub::new(
        Arc::new(RepositoryStatusStore::new(jobs.clone())),
        Arc::new(InMemoryRelay::new()),
        config.stream.subscriber_buffer,
    );
    let quota = Arc::new(QuotaService::new(
        ledger.clone(),
        TieredCache::new("plans", l2.clone(), 128),
    ));
    let lifecycle = Arc::new(JobLifecycleService::new(
        jobs.clone(),
        dispatcher,
        quota.clone(),
        hub.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        tokens,
        lockout: LoginLockout::new(5, Duration::from_secs(900), Duration::from_secs(900)),
        users,
        jobs: jobs.clone(),
        subscriptions: ledger.clone(),
        limiter,
        hub,
        lifecycle,
        quota,
        uploads: Arc::new(UploadUrlMinter::new(&config.object_store).await),
        dashboard_cache: TieredCache::new("dashboard", l2, 128),
    };

    Harness {
        app: build_router(state, applygate_core::health::HealthRegistry::new()),
        ledger,
        jobs,
    }
}

async fn harness() -> Harness {
    harness_with(Arc::new(StubDispatcher::ok()), None, 60).await
}

async fn send(
    app: &Router,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value, axum::http::HeaderMap) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json, headers)
}

async fn register_and_login(app: &Router, email: &str) -> String {
    let (status, body, _) = send(
        app,
        "POST",
        "/api/v1/auth/register",
        None,
        Some(serde_json::json!({ "email": email, "password": "hunter2hunter2" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");

    let (status, body, _) = send(
        app,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(serde_json::json!({ "email": email, "password": "hunter2hunter2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body["token"].as_str().unwrap().to_string()
}

fn submit_body() -> serde_json::Value {
    serde_json::json!({
        "jdUrl": "https://jobs.example.com/123",
        "resumeUri": "uploads/u/r.pdf",
        "modelProvider": "openai",
        "modelName": "gpt-4o",
    })
}

async fn submit_job(app: &Router, token: &str) -> Uuid {
    let (status, body, _) =
        send(app, "POST", "/api/v1/applications", Some(token), Some(submit_body())).await;
    assert_eq!(status, StatusCode::CREATED, "submit failed: {body}");
    body["jobId"].as_str().unwrap().parse().unwrap()
}

async fn inject_status(app: &Router, job_id: Uuid, status: &str, artifact: Option<&str>) {
    let mut body = serde_json::json!({ "jobId": job_id, "status": status });
    if let Some(artifact) = artifact {
        body["artifactRef"] = serde_json::Value::String(artifact.into());
    }
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/internal/status")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-internal-api-key", INTERNAL_KEY)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK, "status injection failed");
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_submission_to_completion() {
    let h = harness().await;
    let token = register_and_login(&h.app, "a@b.c").await;
    let job_id = submit_job(&h.app, &token).await;

    inject_status(&h.app, job_id, "PROCESSING", None).await;
    inject_status(&h.app, job_id, "COMPLETED", Some(&format!("artifacts/{job_id}"))).await;

    let (status, body, _) = send(
        &h.app,
        "GET",
        &format!("/api/v1/applications/{job_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETED");
    assert_eq!(body["artifactRef"], format!("artifacts/{job_id}"));
    assert_eq!(body["version"], 3, "create + two transitions");

    let (status, body, _) = send(
        &h.app,
        "GET",
        &format!("/api/v1/applications/{job_id}/artifact"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["artifactRef"], format!("artifacts/{job_id}"));
    assert_eq!(body["meta"]["modelProvider"], "openai");
}

#[tokio::test]
async fn quota_exhausted_rejects_without_a_row() {
    let subscription = SubscriptionRecord {
        id: Uuid::new_v4(),
        subject_id: Uuid::new_v4(),
        plan_id: Uuid::new_v4(),
        plan_name: "free".into(),
        monthly_quota: Some(10),
        units_used: 10,
        period_start: Utc::now(),
        period_end: Utc::now() + chrono::Duration::days(30),
    };
    let h = harness_with(Arc::new(StubDispatcher::ok()), Some(subscription), 60).await;
    let token = register_and_login(&h.app, "a@b.c").await;

    let (status, body, _) =
        send(&h.app, "POST", "/api/v1/applications", Some(&token), Some(submit_body())).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "quota");
    assert_eq!(body["status"], 402);
    assert!(h.jobs.rows.is_empty(), "denied submission must leave no row");
    assert_eq!(h.ledger.increments.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dispatch_failure_fails_job_with_503() {
    let h = harness_with(Arc::new(StubDispatcher::failing()), None, 60).await;
    let token = register_and_login(&h.app, "a@b.c").await;

    let (status, body, _) =
        send(&h.app, "POST", "/api/v1/applications", Some(&token), Some(submit_body())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "dispatch");

    let (status, body, _) =
        send(&h.app, "GET", "/api/v1/applications", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body["content"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["status"], "FAILED");
    assert_eq!(jobs[0]["failureReason"], "dispatch");

    // Failed dispatch never consumes quota.
    assert_eq!(h.ledger.increments.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn successful_dispatch_counts_usage_once() {
    let h = harness().await;
    let token = register_and_login(&h.app, "a@b.c").await;
    submit_job(&h.app, &token).await;
    assert_eq!(h.ledger.increments.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rate_limit_denies_past_cap_and_stamps_headers() {
    let h = harness_with(Arc::new(StubDispatcher::ok()), None, 3).await;
    let token = register_and_login(&h.app, "a@b.c").await;

    for n in 1..=3u64 {
        let (status, _, headers) =
            send(&h.app, "GET", "/api/v1/dashboard/stats", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get("x-ratelimit-minute").unwrap().to_str().unwrap(),
            n.to_string(),
        );
    }

    for _ in 0..2 {
        let (status, body, headers) =
            send(&h.app, "GET", "/api/v1/dashboard/stats", Some(&token), None).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "rate-limited");
        assert_eq!(headers.get("retry-after").unwrap(), "60");
        assert_eq!(headers.get("x-ratelimit-minute").unwrap(), "4");
    }
}

#[tokio::test]
async fn completion_wins_over_cancel() {
    let h = harness().await;
    let token = register_and_login(&h.app, "a@b.c").await;
    let job_id = submit_job(&h.app, &token).await;

    inject_status(&h.app, job_id, "PROCESSING", None).await;
    inject_status(&h.app, job_id, "COMPLETED", Some("artifacts/x")).await;

    let (status, body, _) = send(
        &h.app,
        "POST",
        &format!("/api/v1/applications/{job_id}/cancel"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (_, body, _) = send(
        &h.app,
        "GET",
        &format!("/api/v1/applications/{job_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["status"], "COMPLETED", "the winning transition stands");
}

#[tokio::test]
async fn cancel_pending_job_succeeds() {
    let h = harness().await;
    let token = register_and_login(&h.app, "a@b.c").await;
    let job_id = submit_job(&h.app, &token).await;

    let (status, body, _) = send(
        &h.app,
        "POST",
        &format!("/api/v1/applications/{job_id}/cancel"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");
    assert_eq!(body["version"], 2);
}

#[tokio::test]
async fn duplicate_status_delivery_is_idempotent() {
    let h = harness().await;
    let token = register_and_login(&h.app, "a@b.c").await;
    let job_id = submit_job(&h.app, &token).await;

    inject_status(&h.app, job_id, "PROCESSING", None).await;
    inject_status(&h.app, job_id, "COMPLETED", Some("artifacts/x")).await;
    // Redelivery of the terminal event: accepted, no second row update.
    inject_status(&h.app, job_id, "COMPLETED", Some("artifacts/x")).await;

    let (_, body, _) = send(
        &h.app,
        "GET",
        &format!("/api/v1/applications/{job_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["version"], 3, "duplicate delivery must not bump the version");
}

#[tokio::test]
async fn unauthenticated_and_foreign_access_denied() {
    let h = harness().await;
    let token = register_and_login(&h.app, "a@b.c").await;
    let job_id = submit_job(&h.app, &token).await;

    let (status, body, _) = send(
        &h.app,
        "GET",
        &format!("/api/v1/applications/{job_id}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "auth");

    let other = register_and_login(&h.app, "other@b.c").await;
    let (status, body, _) = send(
        &h.app,
        "GET",
        &format!("/api/v1/applications/{job_id}"),
        Some(&other),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND, "foreign jobs read as absent");
    assert_eq!(body["error"], "not-found");
}

#[tokio::test]
async fn internal_endpoint_requires_shared_secret() {
    let h = harness().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/internal/status")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-internal-api-key", "wrong")
        .body(Body::from(
            serde_json::json!({ "jobId": Uuid::new_v4(), "status": "PROCESSING" }).to_string(),
        ))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let h = harness().await;
    register_and_login(&h.app, "a@b.c").await;
    let (status, body, _) = send(
        &h.app,
        "POST",
        "/api/v1/auth/register",
        None,
        Some(serde_json::json!({ "email": "a@b.c", "password": "hunter2hunter2" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn login_lockout_after_repeated_failures() {
    let h = harness().await;
    register_and_login(&h.app, "a@b.c").await;

    for _ in 0..5 {
        let (status, _, _) = send(
            &h.app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(serde_json::json!({ "email": "a@b.c", "password": "wrong-password" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // Even the right password is locked out now.
    let (status, body, _) = send(
        &h.app,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(serde_json::json!({ "email": "a@b.c", "password": "hunter2hunter2" })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate-limited");
}

#[tokio::test]
async fn presigned_upload_mints_distinct_keys() {
    let h = harness().await;
    let token = register_and_login(&h.app, "a@b.c").await;

    let request = serde_json::json!({ "fileName": "resume.pdf", "contentType": "application/pdf" });
    let (status, first, _) = send(
        &h.app,
        "POST",
        "/api/v1/uploads/presigned-url",
        Some(&token),
        Some(request.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "presign failed: {first}");
    let (_, second, _) = send(
        &h.app,
        "POST",
        "/api/v1/uploads/presigned-url",
        Some(&token),
        Some(request),
    )
    .await;
    assert_ne!(first["key"], second["key"]);
    assert!(first["url"].as_str().unwrap().contains("X-Amz-Signature"));
    assert!(first["expiresAt"].is_string());

    let (status, body, _) = send(
        &h.app,
        "POST",
        "/api/v1/uploads/presigned-url",
        Some(&token),
        Some(serde_json::json!({ "fileName": "evil.exe", "contentType": "application/x-msdownload" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn invalid_submissions_are_rejected() {
    let h = harness().await;
    let token = register_and_login(&h.app, "a@b.c").await;

    let mut bad_url = submit_body();
    bad_url["jdUrl"] = "ftp://jobs.example.com/1".into();
    let (status, body, _) =
        send(&h.app, "POST", "/api/v1/applications", Some(&token), Some(bad_url)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let mut bad_model = submit_body();
    bad_model["modelName"] = "gpt-99".into();
    let (status, _, _) =
        send(&h.app, "POST", "/api/v1/applications", Some(&token), Some(bad_model)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(h.jobs.rows.is_empty());
}

#[tokio::test]
async fn responses_carry_request_id_and_error_shape() {
    let h = harness().await;
    let (status, body, headers) = send(
        &h.app,
        "GET",
        &format!("/api/v1/applications/{}", Uuid::new_v4()),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(body["error"], "auth");
    assert_eq!(body["status"], 401);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn terminal_job_stream_replays_final_state() {
    let h = harness().await;
    let token = register_and_login(&h.app, "a@b.c").await;
    let job_id = submit_job(&h.app, &token).await;
    inject_status(&h.app, job_id, "PROCESSING", None).await;
    inject_status(&h.app, job_id, "COMPLETED", Some("artifacts/x")).await;

    // `?token=` path: EventSource clients cannot set headers.
    let request = Request::builder()
        .method("GET")
        .uri(format!("/api/v1/applications/{job_id}/stream?token={token}"))
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("event: status"), "frame missing: {text}");
    assert!(text.contains("COMPLETED"), "terminal state missing: {text}");
    assert!(text.contains("id: 1"), "monotonic id missing: {text}");
}

#[tokio::test]
async fn terminal_stream_of_failed_job_carries_reason() {
    let h = harness_with(Arc::new(StubDispatcher::failing()), None, 60).await;
    let token = register_and_login(&h.app, "a@b.c").await;

    let (status, _, _) =
        send(&h.app, "POST", "/api/v1/applications", Some(&token), Some(submit_body())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (_, body, _) = send(&h.app, "GET", "/api/v1/applications", Some(&token), None).await;
    let job_id = body["content"][0]["jobId"].as_str().unwrap().to_string();

    let request = Request::builder()
        .method("GET")
        .uri(format!("/api/v1/applications/{job_id}/stream?token={token}"))
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("FAILED"), "terminal state missing: {text}");
    assert!(
        text.contains(r#""reason":"dispatch""#),
        "failure reason missing from terminal frame: {text}"
    );
}

#[tokio::test]
async fn stream_of_foreign_job_is_404() {
    let h = harness().await;
    let owner = register_and_login(&h.app, "a@b.c").await;
    let job_id = submit_job(&h.app, &owner).await;
    let other = register_and_login(&h.app, "other@b.c").await;

    let request = Request::builder()
        .method("GET")
        .uri(format!("/api/v1/applications/{job_id}/stream?token={other}"))
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dashboard_reflects_job_counts() {
    let h = harness().await;
    let token = register_and_login(&h.app, "a@b.c").await;
    let job_id = submit_job(&h.app, &token).await;
    submit_job(&h.app, &token).await;
    inject_status(&h.app, job_id, "PROCESSING", None).await;
    inject_status(&h.app, job_id, "COMPLETED", Some("artifacts/x")).await;

    let (status, body, _) =
        send(&h.app, "GET", "/api/v1/dashboard/stats", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["completed"], 1);
    assert_eq!(body["pending"], 1);
}
