//! Background workers.

pub mod ingestion_worker;

pub use ingestion_worker::{
    IngestionWorker, IngestionWorkerConfig, IngestionWorkerHandle, JobFailure, WorkerConfigError,
    WorkerState, WorkerStats,
};
