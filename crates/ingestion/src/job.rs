//! Ingestion job record, status lifecycle and partial status updates.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use copilot_core::{DocumentId, DomainError, JobId};

/// Free-form metadata attached to an upload.
///
/// Opaque to the queue; handed to the processor unchanged.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Access role applied when the uploader does not name one.
pub const DEFAULT_ACCESS_ROLE: &str = "all";

/// Job lifecycle status.
///
/// ```text
/// pending ──▶ processing ──▶ completed
///                 │
///                 ├──▶ retrying ──▶ processing ...
///                 └──▶ failed (mirrored into the dead-letter list)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }

    /// `completed` and `failed` are never left by the worker.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "retrying" => Ok(JobStatus::Retrying),
            other => Err(DomainError::validation(format!("unknown job status `{other}`"))),
        }
    }
}

/// Key of the raw upload bytes in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobKey(String);

impl BlobKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An upload handed to [`IngestionQueue::enqueue`](crate::IngestionQueue::enqueue).
#[derive(Debug, Clone, PartialEq)]
pub struct NewUpload {
    pub filename: String,
    pub file_content: Vec<u8>,
    pub title: String,
    pub department: String,
    pub access_role: String,
    pub metadata: Metadata,
}

impl NewUpload {
    pub fn new(
        filename: impl Into<String>,
        file_content: impl Into<Vec<u8>>,
        title: impl Into<String>,
        department: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            file_content: file_content.into(),
            title: title.into(),
            department: department.into(),
            access_role: DEFAULT_ACCESS_ROLE.to_string(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_access_role(mut self, access_role: impl Into<String>) -> Self {
        self.access_role = access_role.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub job_id: JobId,
    pub document_id: DocumentId,
    pub filename: String,
    pub title: String,
    pub department: String,
    pub access_role: String,
    pub metadata: Metadata,
    pub blob_key: BlobKey,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Only meaningful in `failed` / `retrying`.
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub chunks_created: u32,
    pub processing_time_ms: f64,
}

impl IngestionJob {
    /// Build the initial `pending` record for a freshly enqueued upload.
    pub fn pending(
        job_id: JobId,
        document_id: DocumentId,
        blob_key: BlobKey,
        upload: &NewUpload,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            document_id,
            filename: upload.filename.clone(),
            title: upload.title.clone(),
            department: upload.department.clone(),
            access_role: upload.access_role.clone(),
            metadata: upload.metadata.clone(),
            blob_key,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            error_message: None,
            retry_count: 0,
            chunks_created: 0,
            processing_time_ms: 0.0,
        }
    }
}

/// A partial status write.
///
/// `None` leaves a field untouched; `Some(0)` records an explicit zero.
/// `updated_at` is always refreshed by the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub error_message: Option<String>,
    /// Blank out any previous error (set on `completed`).
    pub clear_error: bool,
    pub chunks_created: Option<u32>,
    pub processing_time_ms: Option<f64>,
}

impl StatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            error_message: None,
            clear_error: false,
            chunks_created: None,
            processing_time_ms: None,
        }
    }

    pub fn processing() -> Self {
        Self::new(JobStatus::Processing)
    }

    pub fn completed(chunks_created: u32, processing_time_ms: f64) -> Self {
        Self {
            status: JobStatus::Completed,
            error_message: None,
            clear_error: true,
            chunks_created: Some(chunks_created),
            processing_time_ms: Some(processing_time_ms),
        }
    }

    pub fn retrying(error: impl Into<String>) -> Self {
        Self::new(JobStatus::Retrying).with_error(error)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::new(JobStatus::Failed).with_error(error)
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self.clear_error = false;
        self
    }
}
