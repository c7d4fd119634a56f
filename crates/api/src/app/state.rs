use std::sync::Arc;

use copilot_ingestion::{DocumentProcessor, IngestionQueue, JobStatusReader};

/// Handles needed by the async ingestion endpoints.
#[derive(Clone)]
pub struct IngestionServices {
    pub queue: Arc<dyn IngestionQueue>,
    pub status: JobStatusReader,
}

impl IngestionServices {
    pub fn new(queue: Arc<dyn IngestionQueue>) -> Self {
        let status = JobStatusReader::new(queue.clone());
        Self { queue, status }
    }
}

/// Shared state injected into every handler.
///
/// `ingestion` is `None` when the queue could not be reached at startup; the
/// service then runs in degraded mode with synchronous uploads only.
#[derive(Clone)]
pub struct AppState {
    pub ingestion: Option<IngestionServices>,
    pub processor: Arc<dyn DocumentProcessor>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn async_ingestion_enabled(&self) -> bool {
        self.ingestion.is_some()
    }
}
