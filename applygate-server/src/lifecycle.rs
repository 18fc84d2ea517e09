//! The job lifecycle orchestrator.
//!
//! Submission: validate → quota gate → persist PENDING → dispatch →
//! usage count. A dispatch failure transitions the fresh row to FAILED
//! with reason "dispatch" and surfaces 503. Cancellation is a
//! version-guarded transition plus a control message; subscribers see the
//! terminal status through the normal fan-out.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use applygate_core::types::{JobStatus, Priority, StatusEvent, Subject};
use applygate_core::{ApiError, TraceContext};
use applygate_data::{DataError, JobRecord, JobStore, NewJob, TransitionPatch};
use applygate_dispatch::descriptor::CancelMessage;
use applygate_dispatch::JobDescriptor;
use applygate_stream::StatusHub;

use crate::dispatcher::Dispatcher;
use crate::quota::QuotaService;

/// Providers and the model names accepted for each.
const MODEL_CATALOG: &[(&str, &[&str])] = &[
    ("openai", &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "gpt-4.1-mini"]),
    ("anthropic", &["claude-sonnet-4-20250514", "claude-opus-4-20250514", "claude-3-5-haiku-20241022"]),
    ("google", &["gemini-2.0-flash", "gemini-2.5-pro"]),
];

#[derive(Debug, Deserialize, garde::Validate)]
pub struct SubmitRequest {
    #[serde(rename = "jdUrl")]
    #[garde(length(min = 1, max = 2048))]
    pub jd_url: String,
    #[serde(rename = "resumeUri")]
    #[garde(length(min = 1, max = 1024))]
    pub resume_uri: String,
    #[serde(rename = "modelProvider")]
    #[garde(length(min = 1, max = 64))]
    pub model_provider: String,
    #[serde(rename = "modelName")]
    #[garde(length(min = 1, max = 128))]
    pub model_name: String,
    #[serde(default)]
    #[garde(skip)]
    pub priority: Priority,
}

fn validate(request: &SubmitRequest) -> Result<(), ApiError> {
    use garde::Validate;
    request
        .validate()
        .map_err(|report| ApiError::validation(report.to_string()))?;

    let jd_url = url::Url::parse(&request.jd_url)
        .map_err(|_| ApiError::validation("jdUrl is not a valid URL"))?;
    if !matches!(jd_url.scheme(), "http" | "https") {
        return Err(ApiError::validation("jdUrl must be http(s)"));
    }

    if request.resume_uri.contains("..") || request.resume_uri.starts_with('/') {
        return Err(ApiError::validation("resumeUri is not a valid object key"));
    }

    let models = MODEL_CATALOG
        .iter()
        .find(|(provider, _)| *provider == request.model_provider)
        .map(|(_, models)| *models)
        .ok_or_else(|| ApiError::validation("unknown model provider"))?;
    if !models.contains(&request.model_name.as_str()) {
        return Err(ApiError::validation("unknown model for provider"));
    }
    Ok(())
}

pub struct JobLifecycleService {
    jobs: Arc<dyn JobStore>,
    dispatcher: Arc<dyn Dispatcher>,
    quota: Arc<QuotaService>,
    hub: StatusHub,
}

impl JobLifecycleService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        dispatcher: Arc<dyn Dispatcher>,
        quota: Arc<QuotaService>,
        hub: StatusHub,
    ) -> Self {
        Self {
            jobs,
            dispatcher,
            quota,
            hub,
        }
    }

    /// Admit one submission end to end. Returns the persisted job.
    pub async fn submit(
        &self,
        subject: &Subject,
        trace: &TraceContext,
        request: SubmitRequest,
    ) -> Result<JobRecord, ApiError> {
        validate(&request)?;

        // Quota is checked before any row exists: a denied submission
        // leaves no trace.
        self.quota.ensure_available(subject.id).await?;

        let job = self
            .jobs
            .create(NewJob {
                id: Uuid::new_v4(),
                subject_id: subject.id,
                jd_url: request.jd_url.clone(),
                resume_uri: request.resume_uri.clone(),
                model_provider: request.model_provider.clone(),
                model_name: request.model_name.clone(),
                priority: request.priority,
            })
            .await?;

        let descriptor = JobDescriptor {
            job_id: job.id,
            resume_uri: request.resume_uri,
            jd_url: request.jd_url,
            model_provider: request.model_provider,
            model_name: request.model_name,
            subject_id: subject.id,
            trace_id: trace.correlation_id.clone(),
            priority: request.priority,
        };

        match self.dispatcher.dispatch(&descriptor).await {
            Ok(()) => {
                info!(job_id = %job.id, priority = job.priority.as_str(), "job dispatched");
                // Post-dispatch so rejected dispatches never consume quota.
                self.quota.record_usage(subject.id).await;
                Ok(job)
            }
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "dispatch failed, failing job");
                let patch = TransitionPatch {
                    artifact_ref: None,
                    failure_reason: Some("dispatch".into()),
                };
                if let Err(transition_err) = self
                    .jobs
                    .transition(job.id, job.version, JobStatus::Pending, JobStatus::Failed, patch)
                    .await
                {
                    warn!(job_id = %job.id, error = %transition_err, "failed-job transition lost");
                }
                Err(err.into())
            }
        }
    }

    /// Client-requested cancellation: `PENDING|PROCESSING → CANCELLED`.
    pub async fn cancel(
        &self,
        subject: &Subject,
        trace: &TraceContext,
        job_id: Uuid,
    ) -> Result<JobRecord, ApiError> {
        let job = self.jobs.get(job_id, subject.id).await?;
        if job.status.is_terminal() {
            return Err(ApiError::conflict(format!("job already {}", job.status)));
        }

        let cancelled = self
            .jobs
            .transition(
                job.id,
                job.version,
                job.status,
                JobStatus::Cancelled,
                TransitionPatch::default(),
            )
            .await
            .map_err(|err| match err {
                DataError::Conflict(msg) => ApiError::conflict(msg),
                other => other.into(),
            })?;

        // Tell the worker; best-effort, the row is already terminal.
        let control = CancelMessage {
            job_id,
            requested_by: subject.id,
            trace_id: trace.correlation_id.clone(),
        };
        if let Err(err) = self.dispatcher.cancel(&control).await {
            warn!(job_id = %job_id, error = %err, "cancel control message failed");
        }

        // Local and cross-instance subscribers observe the terminal state.
        self.hub
            .announce(StatusEvent::new(job_id, JobStatus::Cancelled))
            .await;

        Ok(cancelled)
    }
}
