use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use itemflow_core::{JobKind, JobParams};

use crate::app::routes::jobs;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/items/descriptions", post(extract_descriptions))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/descriptions/:item_id", get(get_description))
        .route("/descriptions/:item_id/history", get(description_history))
}

pub async fn extract_descriptions(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Result<Json<dto::ExtractRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text()),
    };

    jobs::enqueue(&services, &headers, body.item_ids, JobParams::Extraction).await
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::JobListQuery>,
) -> axum::response::Response {
    jobs::list_of_kind(&services, Some(JobKind::Extraction), query)
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    jobs::detail_of_kind(&services, &job_id, Some(JobKind::Extraction)).await
}

pub async fn get_description(
    Extension(services): Extension<Arc<AppServices>>,
    Path(item_id): Path<String>,
) -> axum::response::Response {
    match services.jobs.get_result(JobKind::Extraction, &item_id).await {
        Ok(record) => match dto::ExtractedDescription::from_stored(record) {
            Some(view) => Json(view).into_response(),
            None => errors::not_found(format!("description for item {item_id} not found")),
        },
        Err(e) => errors::job_error_to_response(e),
    }
}

pub async fn description_history(
    Extension(services): Extension<Arc<AppServices>>,
    Path(item_id): Path<String>,
) -> axum::response::Response {
    match services
        .jobs
        .result_history(Some(JobKind::Extraction), &item_id)
        .await
    {
        Ok(records) => Json(
            records
                .into_iter()
                .filter_map(dto::ExtractedDescription::from_stored)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}
