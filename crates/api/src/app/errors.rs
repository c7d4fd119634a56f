use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use copilot_ingestion::{ProcessorError, QueueError};

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

pub fn ingestion_unavailable() -> axum::response::Response {
    json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "async_ingestion_unavailable",
        "async ingestion is unavailable: the job queue could not be reached",
    )
}

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::JobNotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        QueueError::Connection(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", msg)
        }
        other => {
            tracing::error!(error = %other, "queue operation failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "queue_error", other.to_string())
        }
    }
}

pub fn processor_error_to_response(err: ProcessorError) -> axum::response::Response {
    match err {
        ProcessorError::UnsupportedFormat(_) => {
            json_error(StatusCode::BAD_REQUEST, "unsupported_format", err.to_string())
        }
        ProcessorError::EmptyDocument => {
            json_error(StatusCode::BAD_REQUEST, "empty_document", err.to_string())
        }
        ProcessorError::Failed(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "processing_failed", msg)
        }
    }
}
