use std::path::Path;

use axum::extract::Multipart;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use copilot_core::{DocumentId, JobId};
use copilot_ingestion::job::{DEFAULT_ACCESS_ROLE, Metadata};
use copilot_ingestion::{DeadLetterEntry, NewUpload, PendingEntry};

use crate::app::errors;

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 1_000;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Multipart form of `POST /documents` and `POST /documents/async`.
#[derive(Debug, Clone)]
pub struct UploadForm {
    pub file: UploadedFile,
    pub title: String,
    pub department: String,
    pub access_role: String,
    pub metadata: Metadata,
}

impl UploadForm {
    pub fn into_upload(self) -> NewUpload {
        NewUpload::new(self.file.filename, self.file.content, self.title, self.department)
            .with_access_role(self.access_role)
            .with_metadata(self.metadata)
    }
}

/// Multipart form of `POST /documents/bulk`.
#[derive(Debug, Clone)]
pub struct BulkUploadForm {
    pub files: Vec<UploadedFile>,
    pub department: String,
    pub access_role: String,
    pub metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

#[derive(Debug, Default)]
struct RawForm {
    files: Vec<UploadedFile>,
    title: Option<String>,
    department: Option<String>,
    access_role: Option<String>,
    metadata: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> Result<RawForm, axum::response::Response> {
    let mut form = RawForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(errors::json_error(e.status(), "invalid_multipart", e.body_text())),
        };

        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let content = field
                .bytes()
                .await
                .map_err(|e| errors::json_error(e.status(), "invalid_multipart", e.body_text()))?;
            form.files.push(UploadedFile {
                filename,
                content: content.to_vec(),
            });
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| errors::json_error(e.status(), "invalid_multipart", e.body_text()))?;
        let value = Some(value).filter(|v| !v.trim().is_empty());
        match name.as_str() {
            "title" => form.title = value,
            "department" => form.department = value,
            "access_role" => form.access_role = value,
            "metadata" => form.metadata = value,
            other => tracing::debug!(field = other, "ignoring unknown form field"),
        }
    }

    Ok(form)
}

fn required(value: Option<String>, field: &str) -> Result<String, axum::response::Response> {
    value.ok_or_else(|| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("`{field}` is required"),
        )
    })
}

fn validate_file(file: UploadedFile) -> Result<UploadedFile, axum::response::Response> {
    if file.filename.trim().is_empty() {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "uploaded file has no filename",
        ));
    }
    Ok(file)
}

/// Parse the optional `metadata` field; anything but a JSON object is dropped.
pub fn parse_metadata(raw: Option<&str>) -> Metadata {
    let Some(raw) = raw else {
        return Metadata::new();
    };
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) => {
            tracing::warn!("metadata is not a JSON object; ignoring it");
            Metadata::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, "invalid metadata JSON; ignoring it");
            Metadata::new()
        }
    }
}

pub async fn parse_upload_form(multipart: Multipart) -> Result<UploadForm, axum::response::Response> {
    let raw = read_form(multipart).await?;
    let file = raw.files.into_iter().next().ok_or_else(|| {
        errors::json_error(StatusCode::BAD_REQUEST, "missing_file", "a `file` field is required")
    })?;

    Ok(UploadForm {
        file: validate_file(file)?,
        title: required(raw.title, "title")?,
        department: required(raw.department, "department")?,
        access_role: raw.access_role.unwrap_or_else(|| DEFAULT_ACCESS_ROLE.to_string()),
        metadata: parse_metadata(raw.metadata.as_deref()),
    })
}

pub async fn parse_bulk_form(multipart: Multipart) -> Result<BulkUploadForm, axum::response::Response> {
    let raw = read_form(multipart).await?;
    if raw.files.is_empty() {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "missing_file",
            "at least one `file` field is required",
        ));
    }

    Ok(BulkUploadForm {
        files: raw.files,
        department: required(raw.department, "department")?,
        access_role: raw.access_role.unwrap_or_else(|| DEFAULT_ACCESS_ROLE.to_string()),
        metadata: parse_metadata(raw.metadata.as_deref()),
    })
}

/// Title used for bulk uploads: the filename without its extension.
pub fn title_from_filename(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or(filename)
        .to_string()
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct DocumentProcessed {
    pub document_id: DocumentId,
    pub filename: String,
    pub title: String,
    pub status: &'static str,
    pub chunks_created: u32,
    pub processing_time_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: JobId,
    pub document_id: DocumentId,
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BulkItem {
    pub filename: String,
    /// `queued`, `rejected` or `failed`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkAccepted {
    pub total_files: usize,
    pub queued: usize,
    pub failed: usize,
    pub items: Vec<BulkItem>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub async_ingestion: bool,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

pub type DeadLetterList = ListResponse<DeadLetterEntry>;
pub type PendingList = ListResponse<PendingEntry>;
