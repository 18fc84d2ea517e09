//! Adapters between the crates' trait seams.
//!
//! - [`RepositoryStatusStore`]: the hub's view of the job repository,
//!   with the idempotent terminal transition.
//! - [`HubEventHandler`]: feeds broker deliveries into the hub.
//! - [`DirectorySubjectResolver`]: token claims resolved against the
//!   user store, so revoked users stop authenticating when their cached
//!   validation expires.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use applygate_auth::token::{Claims, SubjectResolver};
use applygate_auth::AuthError;
use applygate_core::types::{JobStatus, StatusEvent, Subject};
use applygate_data::{DataError, JobStore, TransitionPatch, UserDirectory};
use applygate_dispatch::consumer::EventHandler;
use applygate_stream::{JobGate, JobStatusStore, StatusHub, SubscribeError};

pub struct RepositoryStatusStore {
    jobs: Arc<dyn JobStore>,
}

impl RepositoryStatusStore {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    async fn apply(&self, event: StatusEvent) -> Result<(), String> {
        let job = match self.jobs.get_current(event.job_id).await {
            Ok(job) => job,
            Err(DataError::NotFound(msg)) => return Err(msg),
            Err(err) => return Err(err.to_string()),
        };

        if job.status.is_terminal() {
            // Another consumer already landed a terminal status; the event
            // is a duplicate or the loser of a race. Idempotent success.
            debug!(job_id = %event.job_id, status = %job.status, "terminal event on terminal job, no-op");
            return Ok(());
        }

        // Non-terminal statuses are never persisted, so a COMPLETED event
        // can arrive while the row still says PENDING. Bridge through
        // PROCESSING to keep the recorded history on the DAG.
        let (from, version) = if job.status == JobStatus::Pending && event.status == JobStatus::Completed
        {
            match self
                .jobs
                .transition(
                    event.job_id,
                    job.version,
                    JobStatus::Pending,
                    JobStatus::Processing,
                    TransitionPatch::default(),
                )
                .await
            {
                Ok(bridged) => (bridged.status, bridged.version),
                Err(DataError::Conflict(_)) => {
                    let current = self
                        .jobs
                        .get_current(event.job_id)
                        .await
                        .map_err(|e| e.to_string())?;
                    if current.status.is_terminal() {
                        return Ok(());
                    }
                    (current.status, current.version)
                }
                Err(err) => return Err(err.to_string()),
            }
        } else {
            (job.status, job.version)
        };

        if !from.can_transition_to(event.status) {
            return Err(format!("event {} not reachable from {from}", event.status));
        }

        let patch = TransitionPatch {
            artifact_ref: (event.status == JobStatus::Completed)
                .then(|| event.artifact_ref.clone())
                .flatten(),
            failure_reason: (event.status == JobStatus::Failed).then(|| {
                event
                    .progress
                    .as_ref()
                    .and_then(|p| p.get("reason").and_then(|r| r.as_str()))
                    .unwrap_or("worker")
                    .to_string()
            }),
        };

        match self
            .jobs
            .transition(event.job_id, version, from, event.status, patch)
            .await
        {
            Ok(_) => Ok(()),
            Err(DataError::Conflict(_)) => {
                // Version CAS lost: check whether the winner already made
                // the job terminal, in which case this delivery is done.
                match self.jobs.get_current(event.job_id).await {
                    Ok(current) if current.status.is_terminal() => Ok(()),
                    Ok(current) => Err(format!("lost transition race, job now {}", current.status)),
                    Err(err) => Err(err.to_string()),
                }
            }
            Err(err) => Err(err.to_string()),
        }
    }
}

impl JobStatusStore for RepositoryStatusStore {
    fn apply_terminal(
        &self,
        event: StatusEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>> {
        Box::pin(self.apply(event))
    }

    fn job_gate(
        &self,
        job_id: Uuid,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<JobGate, SubscribeError>> + Send + '_>> {
        Box::pin(async move {
            match self.jobs.get(job_id, subject_id).await {
                Ok(job) => Ok(JobGate { status: job.status }),
                Err(DataError::NotFound(_)) => Err(SubscribeError::NotFound),
                Err(err) => Err(SubscribeError::Store(err.to_string())),
            }
        })
    }
}

/// Routes decoded broker deliveries into the hub.
pub struct HubEventHandler {
    hub: StatusHub,
}

impl HubEventHandler {
    pub fn new(hub: StatusHub) -> Self {
        Self { hub }
    }
}

impl EventHandler for HubEventHandler {
    fn handle(
        &self,
        event: StatusEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>> {
        Box::pin(self.hub.handle_broker_event(event))
    }
}

/// Confirms the token's subject still exists and picks up current roles.
pub struct DirectorySubjectResolver {
    users: Arc<dyn UserDirectory>,
}

impl DirectorySubjectResolver {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }
}

impl SubjectResolver for DirectorySubjectResolver {
    fn resolve<'a>(
        &'a self,
        claims: &'a Claims,
    ) -> Pin<Box<dyn Future<Output = Result<Subject, AuthError>> + Send + 'a>> {
        Box::pin(async move {
            let user = self
                .users
                .find_by_id(claims.sub)
                .await
                .map_err(|e| AuthError::InvalidToken(e.to_string()))?
                .ok_or(AuthError::UnknownSubject)?;
            Ok(user.subject())
        })
    }
}
