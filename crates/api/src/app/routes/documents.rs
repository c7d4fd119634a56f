use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, warn};

use copilot_core::DocumentId;
use copilot_ingestion::{JobStatus, NewUpload, ProcessRequest};

use crate::app::dto::{self, BulkAccepted, BulkItem, DocumentProcessed, JobAccepted, ListQuery};
use crate::app::errors;
use crate::app::state::{AppState, IngestionServices};

pub fn router() -> Router {
    Router::new()
        .route("/", post(upload_document))
        .route("/async", post(upload_document_async))
        .route("/bulk", post(upload_documents_bulk))
        .route("/jobs/:job_id", get(get_job_status))
        .route("/dead-letters", get(list_dead_letters))
        .route("/pending", get(list_pending))
}

fn ingestion(state: &AppState) -> Result<&IngestionServices, axum::response::Response> {
    state.ingestion.as_ref().ok_or_else(errors::ingestion_unavailable)
}

fn unsupported(filename: &str) -> axum::response::Response {
    errors::json_error(
        StatusCode::BAD_REQUEST,
        "unsupported_format",
        format!("unsupported file format: {filename}"),
    )
}

/// Process a document inline and answer once it is chunked.
pub async fn upload_document(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> axum::response::Response {
    let form = match dto::parse_upload_form(multipart).await {
        Ok(form) => form,
        Err(resp) => return resp,
    };

    let document_id = DocumentId::new();
    let filename = form.file.filename.clone();
    let title = form.title.clone();
    let request = ProcessRequest {
        document_id,
        filename: form.file.filename,
        file_content: form.file.content,
        title: form.title,
        department: form.department,
        access_role: form.access_role,
        metadata: form.metadata,
    };

    let outcome = match state.processor.process(request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(%document_id, %filename, error = %e, "synchronous processing failed");
            return errors::processor_error_to_response(e);
        }
    };

    info!(
        %document_id,
        %filename,
        chunks_created = outcome.chunks_created,
        "document processed"
    );

    (
        StatusCode::CREATED,
        Json(DocumentProcessed {
            document_id,
            filename,
            title,
            status: "completed",
            chunks_created: outcome.chunks_created,
            processing_time_ms: outcome.processing_time_ms,
        }),
    )
        .into_response()
}

/// Queue a document for background processing.
pub async fn upload_document_async(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> axum::response::Response {
    let services = match ingestion(&state) {
        Ok(services) => services,
        Err(resp) => return resp,
    };

    let form = match dto::parse_upload_form(multipart).await {
        Ok(form) => form,
        Err(resp) => return resp,
    };
    if !state.processor.supports(&form.file.filename) {
        return unsupported(&form.file.filename);
    }

    let filename = form.file.filename.clone();
    let job_id = match services.queue.enqueue(form.into_upload()).await {
        Ok(job_id) => job_id,
        Err(e) => return errors::queue_error_to_response(e),
    };

    let job = match services.queue.get_job_status(&job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "queue_error",
                format!("job {job_id} vanished after enqueue"),
            );
        }
        Err(e) => return errors::queue_error_to_response(e),
    };

    info!(%job_id, document_id = %job.document_id, %filename, "document queued");

    (
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id,
            document_id: job.document_id,
            status: JobStatus::Pending.as_str(),
            message: format!("Document '{filename}' queued for processing"),
        }),
    )
        .into_response()
}

/// Queue several documents sharing one department, access role and metadata.
pub async fn upload_documents_bulk(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> axum::response::Response {
    let services = match ingestion(&state) {
        Ok(services) => services,
        Err(resp) => return resp,
    };

    let form = match dto::parse_bulk_form(multipart).await {
        Ok(form) => form,
        Err(resp) => return resp,
    };

    let total_files = form.files.len();
    let mut items = Vec::with_capacity(total_files);

    for file in form.files {
        if file.filename.trim().is_empty() {
            items.push(BulkItem {
                filename: file.filename,
                status: "rejected",
                job_id: None,
                error: Some("uploaded file has no filename".to_string()),
            });
            continue;
        }
        if !state.processor.supports(&file.filename) {
            items.push(BulkItem {
                error: Some(format!("unsupported file format: {}", file.filename)),
                filename: file.filename,
                status: "rejected",
                job_id: None,
            });
            continue;
        }

        let upload = NewUpload::new(
            file.filename.clone(),
            file.content,
            dto::title_from_filename(&file.filename),
            form.department.clone(),
        )
        .with_access_role(form.access_role.clone())
        .with_metadata(form.metadata.clone());

        match services.queue.enqueue(upload).await {
            Ok(job_id) => items.push(BulkItem {
                filename: file.filename,
                status: "queued",
                job_id: Some(job_id),
                error: None,
            }),
            Err(e) => {
                warn!(filename = %file.filename, error = %e, "bulk enqueue failed");
                items.push(BulkItem {
                    filename: file.filename,
                    status: "failed",
                    job_id: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let queued = items.iter().filter(|item| item.status == "queued").count();
    info!(total_files, queued, "bulk upload queued");

    (
        StatusCode::ACCEPTED,
        Json(BulkAccepted {
            total_files,
            queued,
            failed: total_files - queued,
            items,
        }),
    )
        .into_response()
}

pub async fn get_job_status(
    Extension(state): Extension<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let services = match ingestion(&state) {
        Ok(services) => services,
        Err(resp) => return resp,
    };

    match services.status.get(&job_id).await {
        Ok(Some(view)) => Json(view).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn list_dead_letters(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    let services = match ingestion(&state) {
        Ok(services) => services,
        Err(resp) => return resp,
    };

    match services.queue.list_dead_letters(query.limit()).await {
        Ok(entries) => Json(dto::DeadLetterList::from(entries)).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn list_pending(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    let services = match ingestion(&state) {
        Ok(services) => services,
        Err(resp) => return resp,
    };

    match services.queue.pending_entries(query.limit()).await {
        Ok(entries) => Json(dto::PendingList::from(entries)).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}
