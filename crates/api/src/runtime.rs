//! Service lifecycle: builds the queue, worker and router, and tears them down.
//!
//! A queue that cannot be reached at startup does not stop the service. It
//! comes up in degraded mode, where only synchronous uploads work.

use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tracing::{info, warn};

use copilot_infra::workers::{
    IngestionWorker, IngestionWorkerConfig, IngestionWorkerHandle, WorkerConfigError,
};
use copilot_ingestion::{
    DocumentProcessor, InMemoryIngestionQueue, IngestionQueue, QueueResult, RetryPolicy,
};

use crate::app::{self, AppState, IngestionServices};
use crate::config::{QueueBackend, Settings};
use crate::processing::{ChunkingError, PlainTextProcessor, SentenceChunker};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid chunking settings: {0}")]
    Chunking(#[from] ChunkingError),

    #[error("invalid worker settings: {0}")]
    Worker(#[from] WorkerConfigError),
}

pub struct Runtime {
    state: Arc<AppState>,
    queue: Option<Arc<dyn IngestionQueue>>,
    worker: Option<IngestionWorkerHandle>,
}

impl Runtime {
    /// Start with the plain-text processor configured from `settings`.
    pub async fn start(settings: &Settings) -> Result<Self, RuntimeError> {
        let chunker = SentenceChunker::new(settings.chunk_size, settings.chunk_overlap)?;
        let processor: Arc<dyn DocumentProcessor> = Arc::new(PlainTextProcessor::new(chunker));
        Self::start_with_processor(settings, processor).await
    }

    /// Start with a caller-supplied processor.
    pub async fn start_with_processor(
        settings: &Settings,
        processor: Arc<dyn DocumentProcessor>,
    ) -> Result<Self, RuntimeError> {
        let worker_config = worker_config(settings);
        worker_config.validate()?;

        let queue = match connect_queue(settings).await {
            Ok(queue) => Some(queue),
            Err(e) => {
                warn!(
                    error = %e,
                    backend = ?settings.queue_backend,
                    "Async ingestion disabled: job queue unavailable"
                );
                None
            }
        };

        let worker = match queue.as_ref() {
            Some(queue) => {
                let worker = IngestionWorker::new(queue.clone(), processor.clone(), worker_config)?;
                info!(consumer = %worker.config().consumer_name, "starting ingestion worker");
                Some(worker.spawn())
            }
            None => None,
        };

        let state = Arc::new(AppState {
            ingestion: queue.clone().map(IngestionServices::new),
            processor,
            max_upload_bytes: settings.max_upload_bytes,
        });

        Ok(Self {
            state,
            queue,
            worker,
        })
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        app::build_app(self.state.clone())
    }

    pub fn async_ingestion_enabled(&self) -> bool {
        self.state.async_ingestion_enabled()
    }

    /// Stop the worker, then close the queue.
    pub async fn shutdown(self) {
        if let Some(worker) = self.worker {
            worker.stop().await;
        }
        if let Some(queue) = self.queue {
            if let Err(e) = queue.disconnect().await {
                warn!(error = %e, "failed to disconnect job queue");
            }
        }
        info!("ingestion runtime stopped");
    }
}

fn worker_config(settings: &Settings) -> IngestionWorkerConfig {
    let config = IngestionWorkerConfig::default()
        .with_consumer_name(settings.consumer_name.clone())
        .with_batch_size(settings.batch_size)
        .with_block(settings.block)
        .with_retry_policy(RetryPolicy::default().with_max_retries(settings.max_retries));

    match settings.reclaim_after {
        Some(min_idle) => config.with_reclaim_after(min_idle),
        None => config,
    }
}

async fn connect_queue(settings: &Settings) -> QueueResult<Arc<dyn IngestionQueue>> {
    let queue = build_queue(settings)?;
    queue.connect().await?;
    Ok(queue)
}

fn build_queue(settings: &Settings) -> QueueResult<Arc<dyn IngestionQueue>> {
    match settings.queue_backend {
        QueueBackend::Memory => Ok(Arc::new(InMemoryIngestionQueue::new())),
        QueueBackend::Redis => redis_queue(settings),
    }
}

#[cfg(feature = "redis")]
fn redis_queue(settings: &Settings) -> QueueResult<Arc<dyn IngestionQueue>> {
    let queue = copilot_infra::queue::RedisIngestionQueue::new(&settings.redis_url)?;
    Ok(Arc::new(queue))
}

#[cfg(not(feature = "redis"))]
fn redis_queue(_settings: &Settings) -> QueueResult<Arc<dyn IngestionQueue>> {
    Err(copilot_ingestion::QueueError::Connection(
        "built without the `redis` feature".to_string(),
    ))
}
