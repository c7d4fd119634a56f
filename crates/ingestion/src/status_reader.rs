//! Read-only job status lookups.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use copilot_core::{DocumentId, JobId};

use crate::job::{IngestionJob, JobStatus};
use crate::queue::{IngestionQueue, QueueResult};

/// The externally visible view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub document_id: DocumentId,
    pub status: JobStatus,
    pub filename: String,
    pub title: String,
    pub department: String,
    pub chunks_created: u32,
    pub processing_time_ms: f64,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<IngestionJob> for JobStatusView {
    fn from(job: IngestionJob) -> Self {
        Self {
            job_id: job.job_id,
            document_id: job.document_id,
            status: job.status,
            filename: job.filename,
            title: job.title,
            department: job.department,
            chunks_created: job.chunks_created,
            processing_time_ms: job.processing_time_ms,
            error_message: job.error_message,
            retry_count: job.retry_count,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct JobStatusReader {
    queue: Arc<dyn IngestionQueue>,
}

impl JobStatusReader {
    pub fn new(queue: Arc<dyn IngestionQueue>) -> Self {
        Self { queue }
    }

    /// Look up a job by its textual id.
    ///
    /// An id that does not parse is reported as "not found", not as an error.
    pub async fn get(&self, job_id: &str) -> QueueResult<Option<JobStatusView>> {
        let Ok(job_id) = job_id.parse::<JobId>() else {
            tracing::debug!(job_id, "status lookup for unparsable job id");
            return Ok(None);
        };
        Ok(self.queue.get_job_status(&job_id).await?.map(JobStatusView::from))
    }
}
