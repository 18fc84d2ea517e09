//! Job repository.
//!
//! Every mutation is an optimistic-concurrency compare-and-set on the
//! version column (`UPDATE … WHERE id = $1 AND version = $2`); losing a
//! race surfaces as [`DataError::Conflict`]. The transition DAG is
//! checked before any SQL runs — asking for an illegal transition is a
//! programmer error and panics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use applygate_core::types::{JobStatus, Priority};

use crate::error::DataError;
use crate::page::{Page, Pageable};
use crate::routing::RoutedPool;
use std::sync::Arc;

/// One job row as stored. `status`/`priority` are kept as text in the
/// database; the typed accessors parse on the way out.
#[derive(Debug, Clone, FromRow)]
struct JobRow {
    id: Uuid,
    subject_id: Uuid,
    submitted_at: DateTime<Utc>,
    jd_url: String,
    resume_uri: String,
    model_provider: String,
    model_name: String,
    status: String,
    priority: String,
    version: i64,
    updated_at: DateTime<Utc>,
    artifact_ref: Option<String>,
    failure_reason: Option<String>,
}

/// Typed view of a job row.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    #[serde(rename = "jobId")]
    pub id: Uuid,
    #[serde(rename = "subjectId")]
    pub subject_id: Uuid,
    #[serde(rename = "submittedAt")]
    pub submitted_at: DateTime<Utc>,
    #[serde(rename = "jdUrl")]
    pub jd_url: String,
    #[serde(rename = "resumeUri")]
    pub resume_uri: String,
    #[serde(rename = "modelProvider")]
    pub model_provider: String,
    #[serde(rename = "modelName")]
    pub model_name: String,
    pub status: JobStatus,
    pub priority: Priority,
    pub version: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "artifactRef", skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    #[serde(rename = "failureReason", skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = DataError;

    fn try_from(row: JobRow) -> Result<Self, DataError> {
        Ok(JobRecord {
            id: row.id,
            subject_id: row.subject_id,
            submitted_at: row.submitted_at,
            jd_url: row.jd_url,
            resume_uri: row.resume_uri,
            model_provider: row.model_provider,
            model_name: row.model_name,
            status: row
                .status
                .parse()
                .map_err(|e: String| DataError::Database(e.into()))?,
            priority: row
                .priority
                .parse()
                .map_err(|e: String| DataError::Database(e.into()))?,
            version: row.version,
            updated_at: row.updated_at,
            artifact_ref: row.artifact_ref,
            failure_reason: row.failure_reason,
        })
    }
}

/// Input for `create`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub jd_url: String,
    pub resume_uri: String,
    pub model_provider: String,
    pub model_name: String,
    pub priority: Priority,
}

/// Optional columns written alongside a transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionPatch {
    pub artifact_ref: Option<String>,
    pub failure_reason: Option<String>,
}

/// Listing filter.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
}

const SELECT_COLUMNS: &str = "id, subject_id, submitted_at, jd_url, resume_uri, \
     model_provider, model_name, status, priority, version, updated_at, \
     artifact_ref, failure_reason";

#[derive(Clone)]
pub struct JobRepository {
    router: Arc<RoutedPool>,
}

impl JobRepository {
    pub fn new(router: Arc<RoutedPool>) -> Self {
        Self { router }
    }

    /// Insert a fresh job: status PENDING, version 1.
    pub async fn create(&self, new: NewJob) -> Result<JobRecord, DataError> {
        let row: JobRow = sqlx::query_as(&format!(
            "INSERT INTO jobs (id, subject_id, submitted_at, jd_url, resume_uri, \
             model_provider, model_name, status, priority, version, updated_at) \
             VALUES ($1, $2, now(), $3, $4, $5, $6, 'PENDING', $7, 1, now()) \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(new.id)
        .bind(new.subject_id)
        .bind(&new.jd_url)
        .bind(&new.resume_uri)
        .bind(&new.model_provider)
        .bind(&new.model_name)
        .bind(new.priority.as_str())
        .fetch_one(self.router.writer())
        .await?;
        row.try_into()
    }

    /// Fetch a job owned by `subject_id`; a foreign or absent job is
    /// NotFound (ownership is authorization in this layer).
    pub async fn get(&self, id: Uuid, subject_id: Uuid) -> Result<JobRecord, DataError> {
        let row: JobRow = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE id = $1 AND subject_id = $2"
        ))
        .bind(id)
        .bind(subject_id)
        .fetch_optional(self.router.reader())
        .await?
        .ok_or_else(|| DataError::NotFound(format!("job {id}")))?;
        row.try_into()
    }

    /// Fetch a job by id with read-after-write consistency (primary).
    /// The status hub uses this; it has no owning subject in hand.
    pub async fn get_current(&self, id: Uuid) -> Result<JobRecord, DataError> {
        let row: JobRow = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.router.writer())
        .await?
        .ok_or_else(|| DataError::NotFound(format!("job {id}")))?;
        row.try_into()
    }

    /// Compare-and-set transition.
    ///
    /// The caller names the version it observed; if another writer got
    /// there first the update matches zero rows and this returns
    /// [`DataError::Conflict`]. Patch invariants (artifact iff COMPLETED,
    /// failure reason iff FAILED) and DAG legality are programmer
    /// contracts and panic when violated.
    pub async fn transition(
        &self,
        id: Uuid,
        expected_version: i64,
        from: JobStatus,
        to: JobStatus,
        patch: TransitionPatch,
    ) -> Result<JobRecord, DataError> {
        assert!(
            from.can_transition_to(to),
            "illegal job transition {from} -> {to}"
        );
        assert!(
            patch.artifact_ref.is_none() || to == JobStatus::Completed,
            "artifact reference only valid on COMPLETED"
        );
        assert!(
            patch.failure_reason.is_none() || to == JobStatus::Failed,
            "failure reason only valid on FAILED"
        );

        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs SET status = $3, version = version + 1, updated_at = now(), \
             artifact_ref = COALESCE($4, artifact_ref), \
             failure_reason = COALESCE($5, failure_reason) \
             WHERE id = $1 AND version = $2 AND status = $6 \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(id)
        .bind(expected_version)
        .bind(to.as_str())
        .bind(patch.artifact_ref.as_deref())
        .bind(patch.failure_reason.as_deref())
        .bind(from.as_str())
        .fetch_optional(self.router.writer())
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(DataError::Conflict(format!(
                "job {id} moved past version {expected_version}"
            ))),
        }
    }

    /// List a subject's jobs, newest first.
    pub async fn list(
        &self,
        subject_id: Uuid,
        filter: JobFilter,
        pageable: Pageable,
    ) -> Result<Page<JobRecord>, DataError> {
        let pageable = pageable.clamped(100);
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE subject_id = $1 \
             AND ($2::TEXT IS NULL OR status = $2)",
        )
        .bind(subject_id)
        .bind(status)
        .fetch_one(self.router.reader())
        .await?;

        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE subject_id = $1 \
             AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY submitted_at DESC LIMIT $3 OFFSET $4"
        ))
        .bind(subject_id)
        .bind(status)
        .bind(pageable.size as i64)
        .bind(pageable.offset() as i64)
        .fetch_all(self.router.reader())
        .await?;

        let content = rows
            .into_iter()
            .map(JobRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(content, &pageable, total as u64))
    }

    pub async fn count_for_subject(&self, subject_id: Uuid) -> Result<u64, DataError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE subject_id = $1")
            .bind(subject_id)
            .fetch_one(self.router.reader())
            .await?;
        Ok(count as u64)
    }

    /// Status → count map for one subject; feeds the dashboard.
    pub async fn counts_by_status(&self, subject_id: Uuid) -> Result<Vec<(String, i64)>, DataError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM jobs WHERE subject_id = $1 GROUP BY status",
        )
        .bind(subject_id)
        .fetch_all(self.router.reader())
        .await?;
        Ok(rows)
    }
}

/// Object-safe job-store seam.
///
/// The server composes against this trait so the HTTP layer can be
/// exercised with an in-memory implementation; [`JobRepository`] is the
/// production backend.
pub trait JobStore: Send + Sync + 'static {
    fn create<'a>(
        &'a self,
        new: NewJob,
    ) -> Pin<Box<dyn Future<Output = Result<JobRecord, DataError>> + Send + 'a>>;

    fn get<'a>(
        &'a self,
        id: Uuid,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<JobRecord, DataError>> + Send + 'a>>;

    fn get_current<'a>(
        &'a self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<JobRecord, DataError>> + Send + 'a>>;

    fn transition<'a>(
        &'a self,
        id: Uuid,
        expected_version: i64,
        from: JobStatus,
        to: JobStatus,
        patch: TransitionPatch,
    ) -> Pin<Box<dyn Future<Output = Result<JobRecord, DataError>> + Send + 'a>>;

    fn list<'a>(
        &'a self,
        subject_id: Uuid,
        filter: JobFilter,
        pageable: Pageable,
    ) -> Pin<Box<dyn Future<Output = Result<Page<JobRecord>, DataError>> + Send + 'a>>;

    fn count_for_subject<'a>(
        &'a self,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<u64, DataError>> + Send + 'a>>;

    fn counts_by_status<'a>(
        &'a self,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<(String, i64)>, DataError>> + Send + 'a>>;
}

use std::future::Future;
use std::pin::Pin;

impl JobStore for JobRepository {
    fn create<'a>(
        &'a self,
        new: NewJob,
    ) -> Pin<Box<dyn Future<Output = Result<JobRecord, DataError>> + Send + 'a>> {
        Box::pin(JobRepository::create(self, new))
    }

    fn get<'a>(
        &'a self,
        id: Uuid,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<JobRecord, DataError>> + Send + 'a>> {
        Box::pin(JobRepository::get(self, id, subject_id))
    }

    fn get_current<'a>(
        &'a self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<JobRecord, DataError>> + Send + 'a>> {
        Box::pin(JobRepository::get_current(self, id))
    }

    fn transition<'a>(
        &'a self,
        id: Uuid,
        expected_version: i64,
        from: JobStatus,
        to: JobStatus,
        patch: TransitionPatch,
    ) -> Pin<Box<dyn Future<Output = Result<JobRecord, DataError>> + Send + 'a>> {
        Box::pin(JobRepository::transition(self, id, expected_version, from, to, patch))
    }

    fn list<'a>(
        &'a self,
        subject_id: Uuid,
        filter: JobFilter,
        pageable: Pageable,
    ) -> Pin<Box<dyn Future<Output = Result<Page<JobRecord>, DataError>> + Send + 'a>> {
        Box::pin(JobRepository::list(self, subject_id, filter, pageable))
    }

    fn count_for_subject<'a>(
        &'a self,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<u64, DataError>> + Send + 'a>> {
        Box::pin(JobRepository::count_for_subject(self, subject_id))
    }

    fn counts_by_status<'a>(
        &'a self,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<(String, i64)>, DataError>> + Send + 'a>> {
        Box::pin(JobRepository::counts_by_status(self, subject_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_repository() -> JobRepository {
        let cfg = applygate_core::config::DbConfig {
            primary_url: "postgres://primary.invalid/app".into(),
            replica_urls: vec![],
            read_strategy: "round-robin".into(),
            max_connections: 1,
            acquire_timeout: std::time::Duration::from_millis(50),
            statement_timeout: std::time::Duration::from_secs(60),
        };
        JobRepository::new(Arc::new(crate::routing::RoutedPool::connect(&cfg).unwrap()))
    }

    // The DAG and patch contracts fire before any pool access, so a lazy
    // pool pointed at nothing is enough to exercise them.

    #[tokio::test]
    #[should_panic(expected = "illegal job transition")]
    async fn illegal_transition_panics_before_sql() {
        let repo = offline_repository();
        let _ = repo
            .transition(
                Uuid::new_v4(),
                1,
                JobStatus::Completed,
                JobStatus::Processing,
                TransitionPatch::default(),
            )
            .await;
    }

    #[tokio::test]
    #[should_panic(expected = "artifact reference only valid on COMPLETED")]
    async fn artifact_on_non_completed_panics() {
        let repo = offline_repository();
        let _ = repo
            .transition(
                Uuid::new_v4(),
                1,
                JobStatus::Processing,
                JobStatus::Failed,
                TransitionPatch {
                    artifact_ref: Some("artifacts/x".into()),
                    failure_reason: None,
                },
            )
            .await;
    }

    #[test]
    fn job_record_wire_shape() {
        let record = JobRecord {
            id: Uuid::nil(),
            subject_id: Uuid::nil(),
            submitted_at: Utc::now(),
            jd_url: "https://jobs.example.com/1".into(),
            resume_uri: "uploads/u/r.pdf".into(),
            model_provider: "openai".into(),
            model_name: "gpt-4o".into(),
            status: JobStatus::Pending,
            priority: Priority::Normal,
            version: 1,
            updated_at: Utc::now(),
            artifact_ref: None,
            failure_reason: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["jdUrl"], "https://jobs.example.com/1");
        assert!(json.get("artifactRef").is_none());
    }
}
