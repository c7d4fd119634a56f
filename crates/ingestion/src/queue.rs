//! Durable ingestion queue abstraction.
//!
//! An ingestion queue bundles four stores behind one contract:
//!
//! - **Log**: an append-only stream of `{job_id}` pointers read through a
//!   consumer group (at-least-once, one consumer per entry at a time)
//! - **Status store**: one record per job, outliving its log entry
//! - **Blob store**: raw upload bytes with a bounded TTL
//! - **Dead-letter list**: `{job_id, error, failed_at}` records, newest first
//!
//! ## Delivery
//!
//! Entries stay *pending* from delivery until [`IngestionQueue::acknowledge`].
//! A consumer that dies mid-job leaves its entries pending; they can be taken
//! over with [`IngestionQueue::claim_stale`]. Consumers must therefore be
//! idempotent per `document_id`.
//!
//! ## Connection lifecycle
//!
//! `connect()` and `disconnect()` are idempotent. Every other operation
//! connects lazily, so callers never need to check connection state.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use copilot_core::JobId;

use crate::codec::CodecError;
use crate::job::{BlobKey, IngestionJob, NewUpload, StatusUpdate};

/// Default log (stream) key.
pub const DEFAULT_STREAM_KEY: &str = "ingestion:jobs:stream";

/// Default prefix of per-job status records (`{prefix}:{job_id}`).
pub const DEFAULT_JOBS_PREFIX: &str = "ingestion:jobs:details";

/// Default dead-letter list key.
pub const DEFAULT_DLQ_KEY: &str = "ingestion:jobs:dlq";

/// Default consumer group shared by all ingestion workers.
pub const DEFAULT_CONSUMER_GROUP: &str = "ingestion_workers";

/// Default prefix of blob keys (`{prefix}{job_id}`).
pub const DEFAULT_BLOB_PREFIX: &str = "ingestion:files:";

/// How long uploaded bytes are kept, independent of job status.
pub const FILE_CONTENT_TTL: Duration = Duration::from_secs(3600);

pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by queue backends.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("consumer group error: {0}")]
    ConsumerGroup(String),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("stored job is malformed: {0}")]
    Codec(#[from] CodecError),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("queue state poisoned")]
    Poisoned,
}

/// Identifier of a log entry (`{millis}-{seq}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for EntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A log entry delivered to a consumer.
///
/// `job_id` is the raw field as stored; it may be absent or unparsable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    pub job_id: Option<String>,
}

/// A job that exhausted its retries (or can never succeed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job_id: JobId,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// A delivered but not yet acknowledged log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub entry_id: EntryId,
    pub consumer: String,
    pub idle_ms: u64,
    pub delivery_count: u64,
}

/// Key layout of a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub stream: String,
    pub jobs_prefix: String,
    pub dlq: String,
    pub group: String,
    pub blob_prefix: String,
}

impl Default for QueueKeys {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM_KEY.to_string(),
            jobs_prefix: DEFAULT_JOBS_PREFIX.to_string(),
            dlq: DEFAULT_DLQ_KEY.to_string(),
            group: DEFAULT_CONSUMER_GROUP.to_string(),
            blob_prefix: DEFAULT_BLOB_PREFIX.to_string(),
        }
    }
}

impl QueueKeys {
    /// Keys with a common namespace prefix (useful to isolate tests).
    pub fn namespaced(namespace: &str) -> Self {
        let d = Self::default();
        Self {
            stream: format!("{namespace}:{}", d.stream),
            jobs_prefix: format!("{namespace}:{}", d.jobs_prefix),
            dlq: format!("{namespace}:{}", d.dlq),
            group: d.group,
            blob_prefix: format!("{namespace}:{}", d.blob_prefix),
        }
    }

    pub fn job_key(&self, job_id: &JobId) -> String {
        format!("{}:{}", self.jobs_prefix, job_id)
    }

    pub fn blob_key(&self, job_id: &JobId) -> BlobKey {
        BlobKey::new(format!("{}{}", self.blob_prefix, job_id))
    }
}

/// The durable ingestion queue.
#[async_trait]
pub trait IngestionQueue: Send + Sync {
    /// Open connections and ensure the consumer group exists (creating the
    /// log if needed). "Group already exists" is success.
    async fn connect(&self) -> QueueResult<()>;

    /// Release connections. Calling it twice is harmless.
    async fn disconnect(&self) -> QueueResult<()>;

    /// Store the bytes, write a `pending` record and append a pointer.
    ///
    /// Returns as soon as the job is durable; processing happens later.
    async fn enqueue(&self, upload: NewUpload) -> QueueResult<JobId>;

    async fn get_job_status(&self, job_id: &JobId) -> QueueResult<Option<IngestionJob>>;

    /// Apply a partial update; `updated_at` is always refreshed.
    async fn update_job_status(&self, job_id: &JobId, update: &StatusUpdate) -> QueueResult<()>;

    /// `None` once the bytes expired or were deleted.
    async fn get_file_content(&self, key: &BlobKey) -> QueueResult<Option<Vec<u8>>>;

    /// Idempotent.
    async fn delete_file_content(&self, key: &BlobKey) -> QueueResult<()>;

    /// Atomically bump `retry_count`, set status `retrying`, return the new count.
    async fn increment_retry(&self, job_id: &JobId) -> QueueResult<u32>;

    /// Push a dead-letter record, then mark the job `failed` with `error`.
    async fn move_to_dlq(&self, job_id: &JobId, error: &str) -> QueueResult<()>;

    /// Dead-letter records, newest first.
    async fn list_dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetterEntry>>;

    /// Read up to `count` never-delivered entries for `consumer`, waiting up to
    /// `block` for the first one. A zero `block` does not wait.
    async fn read_batch(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> QueueResult<Vec<LogEntry>>;

    /// Append a fresh pointer for an existing job (retry path).
    async fn append_pointer(&self, job_id: &JobId) -> QueueResult<EntryId>;

    async fn acknowledge(&self, entry: &EntryId) -> QueueResult<()>;

    /// Delivered-but-unacknowledged entries, oldest first.
    async fn pending_entries(&self, limit: usize) -> QueueResult<Vec<PendingEntry>>;

    /// Take over entries that have been pending for at least `min_idle`.
    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<LogEntry>>;
}
