use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use itemflow_core::{EnrichmentParams, JobKind, JobParams};
use itemflow_infra::jobs::ResultFilter;

use crate::app::dto::DateBound;
use crate::app::routes::jobs;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/run", post(run_enrichment))
        .route("/models", get(list_models))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/enriched", get(search_enriched))
        .route("/enriched/:item_id", get(get_enriched))
        .route("/enriched/:item_id/history", get(enriched_history))
}

pub async fn run_enrichment(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Result<Json<dto::EnrichmentRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text()),
    };

    let model = body
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| services.default_model.clone());

    let params = match EnrichmentParams::new(body.tone, body.max_words, model) {
        Ok(p) => p,
        Err(e) => return errors::job_error_to_response(e.into()),
    };

    jobs::enqueue(&services, &headers, body.item_ids, JobParams::Enrichment(params)).await
}

pub async fn list_models(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.jobs.list_models().await {
        Ok(models) => Json(serde_json::json!({
            "models": models,
            "default_model": services.default_model,
        }))
        .into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::JobListQuery>,
) -> axum::response::Response {
    jobs::list_of_kind(&services, Some(JobKind::Enrichment), query)
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    jobs::detail_of_kind(&services, &job_id, Some(JobKind::Enrichment)).await
}

pub async fn search_enriched(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ResultSearchQuery>,
) -> axum::response::Response {
    let created_from =
        match dto::parse_timestamp("created_from", query.created_from.as_deref(), DateBound::Start) {
            Ok(t) => t,
            Err(r) => return r,
        };
    let created_to =
        match dto::parse_timestamp("created_to", query.created_to.as_deref(), DateBound::End) {
            Ok(t) => t,
            Err(r) => return r,
        };
    let pagination = match dto::parse_pagination(query.limit, query.offset) {
        Ok(p) => p,
        Err(r) => return r,
    };

    let filter = ResultFilter {
        kind: Some(JobKind::Enrichment),
        q: query.q,
        created_from,
        created_to,
        ..Default::default()
    };

    match services.jobs.list_results(&filter, pagination).await {
        Ok(page) => Json(dto::ListResponse::from_page(page, dto::EnrichedProduct::from_stored))
            .into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

pub async fn get_enriched(
    Extension(services): Extension<Arc<AppServices>>,
    Path(item_id): Path<String>,
) -> axum::response::Response {
    match services.jobs.get_result(JobKind::Enrichment, &item_id).await {
        Ok(record) => match dto::EnrichedProduct::from_stored(record) {
            Some(view) => Json(view).into_response(),
            None => errors::not_found(format!("enriched product {item_id} not found")),
        },
        Err(e) => errors::job_error_to_response(e),
    }
}

pub async fn enriched_history(
    Extension(services): Extension<Arc<AppServices>>,
    Path(item_id): Path<String>,
) -> axum::response::Response {
    match services
        .jobs
        .result_history(Some(JobKind::Enrichment), &item_id)
        .await
    {
        Ok(records) => Json(
            records
                .into_iter()
                .filter_map(dto::EnrichedProduct::from_stored)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}
