use axum::{
    routing::{get, post},
    Router,
};

pub mod audit;
pub mod enrichment;
pub mod extract;
pub mod jobs;
pub mod system;

/// Router for every endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:job_id", get(jobs::get_job))
        .route("/jobs/:job_id/cancel", post(jobs::cancel_job))
        .nest("/extract", extract::router())
        .nest("/enrichment", enrichment::router())
        .nest("/audit", audit::router())
}
