//! Endpoints and helpers shared by every job kind.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use itemflow_core::{JobKind, JobParams};
use itemflow_infra::jobs::{CancelOutcome, JobFilter};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Submit a job; 202 when a new job was created, 200 when an earlier
/// submission with the same key is returned instead.
pub(crate) async fn enqueue(
    services: &AppServices,
    headers: &HeaderMap,
    item_ids: Vec<String>,
    params: JobParams,
) -> axum::response::Response {
    let key = dto::idempotency_key(headers);

    let submission = match services.jobs.submit(item_ids, params, key.as_deref()).await {
        Ok(s) => s,
        Err(e) => return errors::job_error_to_response(e),
    };

    let (status, message) = if submission.created {
        (StatusCode::ACCEPTED, dto::ENQUEUED)
    } else {
        (StatusCode::OK, dto::ALREADY_ENQUEUED)
    };

    (
        status,
        Json(dto::EnqueueResponse {
            job_id: submission.job_id.to_string(),
            status: submission.status,
            message,
        }),
    )
        .into_response()
}

pub(crate) fn list_of_kind(
    services: &AppServices,
    kind: Option<JobKind>,
    query: dto::JobListQuery,
) -> axum::response::Response {
    let status = match dto::parse_status(query.status.as_deref()) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let pagination = match dto::parse_pagination(query.limit, query.offset) {
        Ok(p) => p,
        Err(r) => return r,
    };

    let page = services.jobs.list_jobs(&JobFilter { kind, status }, pagination);
    Json(dto::ListResponse::from_page(page, |job| {
        Some(dto::JobSummary::from(&job))
    }))
    .into_response()
}

/// Job snapshot plus the records it produced. A job of another kind than
/// `kind` is reported as missing.
pub(crate) async fn detail_of_kind(
    services: &AppServices,
    raw_id: &str,
    kind: Option<JobKind>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(raw_id) {
        Ok(id) => id,
        Err(r) => return r,
    };

    let job = match services.jobs.get_job(job_id) {
        Ok(job) => job,
        Err(e) => return errors::job_error_to_response(e),
    };
    if let Some(kind) = kind.filter(|k| *k != job.kind) {
        return errors::not_found(format!("{kind} job {job_id} not found"));
    }

    let results = match services.jobs.job_results(job_id).await {
        Ok(results) => results,
        Err(e) => return errors::job_error_to_response(e),
    };

    Json(dto::JobDetail::new(&job, results)).into_response()
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::JobListQuery>,
) -> axum::response::Response {
    list_of_kind(&services, None, query)
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    detail_of_kind(&services, &job_id, None).await
}

pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(r) => return r,
    };

    let (status, job, message) = match services.jobs.cancel_job(job_id) {
        Ok(CancelOutcome::Requested(job)) => (StatusCode::ACCEPTED, job, dto::CANCEL_REQUESTED),
        Ok(CancelOutcome::AlreadyTerminal(job)) => (StatusCode::OK, job, dto::ALREADY_FINISHED),
        Err(e) => return errors::job_error_to_response(e),
    };

    (
        status,
        Json(dto::CancelResponse {
            job_id: job.id.to_string(),
            status: job.status,
            cancel_requested: job.cancel_requested,
            message,
        }),
    )
        .into_response()
}
