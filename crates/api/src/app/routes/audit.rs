use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use itemflow_infra::jobs::AuditFilter;

use crate::app::dto::DateBound;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/jobs", get(list_audits))
        .route("/jobs/:job_id", get(get_audit))
}

pub async fn list_audits(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::AuditQuery>,
) -> axum::response::Response {
    let kind = match dto::parse_kind(query.kind.as_deref()) {
        Ok(k) => k,
        Err(r) => return r,
    };
    let status = match dto::parse_status(query.status.as_deref()) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let started_after =
        match dto::parse_timestamp("started_after", query.started_after.as_deref(), DateBound::Start) {
            Ok(t) => t,
            Err(r) => return r,
        };
    let started_before =
        match dto::parse_timestamp("started_before", query.started_before.as_deref(), DateBound::End) {
            Ok(t) => t,
            Err(r) => return r,
        };
    let pagination = match dto::parse_pagination(query.limit, query.offset) {
        Ok(p) => p,
        Err(r) => return r,
    };

    let filter = AuditFilter {
        kind,
        status,
        started_after,
        started_before,
    };

    match services.jobs.list_audits(&filter, pagination).await {
        Ok(page) => Json(dto::ListResponse::from_page(page, Some)).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

pub async fn get_audit(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(r) => return r,
    };

    match services.jobs.get_audit(job_id).await {
        Ok(audit) => Json(audit).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}
