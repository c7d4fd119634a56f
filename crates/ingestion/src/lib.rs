//! `copilot-ingestion`: asynchronous document-ingestion primitives.
//!
//! This crate holds the transport-agnostic half of the pipeline:
//!
//! - `job`: the typed job record, status lifecycle and partial updates
//! - `codec`: the single place that maps a job to/from the flat string map kept in the status store
//! - `queue`: the `IngestionQueue` contract (log + status store + blob store + dead-letter list)
//! - `retry`: retry budget and backoff schedule
//! - `processor`: the `DocumentProcessor` contract the worker hands documents to
//! - `status_reader`: read-only job status lookups for the HTTP boundary
//! - `in_memory_queue`: an in-process `IngestionQueue` for tests and local development
//!
//! The Redis Streams backend and the worker loop live in `copilot-infra`.

pub mod codec;
pub mod in_memory_queue;
pub mod job;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod status_reader;

pub use codec::CodecError;
pub use in_memory_queue::InMemoryIngestionQueue;
pub use job::{BlobKey, IngestionJob, JobStatus, NewUpload, StatusUpdate};
pub use processor::{DocumentProcessor, ProcessOutcome, ProcessRequest, ProcessorError};
pub use queue::{
    DeadLetterEntry, EntryId, IngestionQueue, LogEntry, PendingEntry, QueueError, QueueKeys,
    QueueResult,
};
pub use retry::RetryPolicy;
pub use status_reader::{JobStatusReader, JobStatusView};
