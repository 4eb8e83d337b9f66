use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use itemflow_infra::jobs::JobError;

pub fn job_error_to_response(err: JobError) -> axum::response::Response {
    match err {
        JobError::Validation {
            message,
            available_models: Some(models),
        } => (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({
                "error": "validation_error",
                "message": message,
                "available_models": models,
            })),
        )
            .into_response(),
        JobError::Validation { message, .. } => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", message)
        }
        JobError::NotFound(what) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
        }
        JobError::ExternalUnavailable(msg) => {
            tracing::warn!(error = %msg, "external collaborator unavailable");
            json_error(StatusCode::BAD_GATEWAY, "external_unavailable", msg)
        }
        JobError::Storage(msg) => {
            tracing::error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn not_found(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", message)
}
