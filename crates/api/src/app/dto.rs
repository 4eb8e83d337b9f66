use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use itemflow_core::{JobId, JobKind};
use itemflow_infra::jobs::{
    Job, JobStatus, Page, Pagination, ResultContent, StoredResult, Task, TaskOutcome,
};

use crate::app::errors;

pub const ENQUEUED: &str = "Request enqueued successfully.";
pub const ALREADY_ENQUEUED: &str = "Request already enqueued.";
pub const CANCEL_REQUESTED: &str = "Cancellation requested.";
pub const ALREADY_FINISHED: &str = "Job already finished.";

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub item_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnrichmentRequest {
    pub item_ids: Vec<String>,
    pub tone: Option<String>,
    pub max_words: Option<u32>,
    /// Falls back to the configured default model.
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResultSearchQuery {
    pub q: Option<String>,
    pub created_from: Option<String>,
    pub created_to: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub kind: Option<String>,
    pub status: Option<String>,
    pub started_after: Option<String>,
    pub started_before: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub cancel_requested: bool,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    /// Total matches before pagination.
    pub count: u64,
    pub items: Vec<T>,
    pub has_more: bool,
}

impl<T> ListResponse<T> {
    pub fn from_page<S>(page: Page<S>, map: impl FnMut(S) -> Option<T>) -> Self {
        Self {
            count: page.total,
            items: page.items.into_iter().filter_map(map).collect(),
            has_more: page.has_more,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub detail: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub total_tasks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retries: u32,
    pub cancel_requested: bool,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            kind: job.kind,
            status: job.status,
            detail: job.detail.clone(),
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            duration_seconds: job.duration_ms().map(|ms| ms as f64 / 1000.0),
            total_tasks: job.total_tasks,
            succeeded: job.succeeded,
            failed: job.failed,
            retries: job.retries,
            cancel_requested: job.cancel_requested,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskView {
    pub item_id: String,
    pub outcome: TaskOutcome,
    pub attempts: u32,
    pub error: Option<String>,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            item_id: task.target_id.clone(),
            outcome: task.outcome,
            attempts: task.attempts,
            error: task.last_error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub tasks: Vec<TaskView>,
    /// Records produced by this job.
    pub results: Vec<StoredResult>,
}

impl JobDetail {
    pub fn new(job: &Job, results: Vec<StoredResult>) -> Self {
        Self {
            summary: JobSummary::from(job),
            tasks: job.tasks.iter().map(TaskView::from).collect(),
            results,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EnrichedProduct {
    pub id: i64,
    pub item_id: String,
    pub job_id: String,
    pub original_description: String,
    pub enriched_description: String,
    pub created_at: DateTime<Utc>,
}

impl EnrichedProduct {
    pub fn from_stored(record: StoredResult) -> Option<Self> {
        match record.content {
            ResultContent::Enriched {
                original_description,
                enriched_description,
            } => Some(Self {
                id: record.id,
                item_id: record.target_id,
                job_id: record.job_id.to_string(),
                original_description,
                enriched_description,
                created_at: record.created_at,
            }),
            ResultContent::Extracted { .. } => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExtractedDescription {
    pub id: i64,
    pub item_id: String,
    pub job_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl ExtractedDescription {
    pub fn from_stored(record: StoredResult) -> Option<Self> {
        match record.content {
            ResultContent::Extracted { description } => Some(Self {
                id: record.id,
                item_id: record.target_id,
                job_id: record.job_id.to_string(),
                description,
                created_at: record.created_at,
            }),
            ResultContent::Enriched { .. } => None,
        }
    }
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"))
}

pub fn parse_status(raw: Option<&str>) -> Result<Option<JobStatus>, axum::response::Response> {
    raw.map(|s| {
        s.parse().map_err(|e: itemflow_core::DomainError| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_status", e.to_string())
        })
    })
    .transpose()
}

pub fn parse_kind(raw: Option<&str>) -> Result<Option<JobKind>, axum::response::Response> {
    raw.map(|s| {
        s.parse().map_err(|e: itemflow_core::DomainError| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_kind", e.to_string())
        })
    })
    .transpose()
}

/// `limit` must be within 1..=200 when given; defaults to 50.
pub fn parse_pagination(
    limit: Option<u32>,
    offset: Option<u32>,
) -> Result<Pagination, axum::response::Response> {
    if limit.is_some_and(|l| !(1..=Pagination::MAX_LIMIT).contains(&l)) {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_pagination",
            format!("limit must be between 1 and {}", Pagination::MAX_LIMIT),
        ));
    }
    Ok(Pagination::new(limit, offset))
}

/// Which end of the day a bare date stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    Start,
    End,
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (UTC).
pub fn parse_timestamp(
    field: &'static str,
    raw: Option<&str>,
    bound: DateBound,
) -> Result<Option<DateTime<Utc>>, axum::response::Response> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(at.with_timezone(&Utc)));
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = match bound {
            DateBound::Start => NaiveTime::MIN,
            DateBound::End => NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)
                .unwrap_or(NaiveTime::MIN),
        };
        return Ok(Some(date.and_time(time).and_utc()));
    }

    Err(errors::json_error(
        StatusCode::BAD_REQUEST,
        "invalid_timestamp",
        format!("{field} must be an RFC 3339 timestamp or a YYYY-MM-DD date"),
    ))
}

/// Blank `Idempotency-Key` headers count as absent.
pub fn idempotency_key(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}
