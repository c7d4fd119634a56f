//! Redis Streams-backed ingestion queue (durable, at-least-once delivery).
//!
//! This implementation maps the four queue stores onto Redis:
//! - **Log**: a stream read through one consumer group (XADD/XREADGROUP/XACK)
//! - **Status store**: one hash per job (HSET/HGETALL/HINCRBY)
//! - **Blob store**: plain string keys with a TTL (SET ... EX)
//! - **Dead-letter list**: JSON records pushed with LPUSH (newest first)
//!
//! ## Architecture
//!
//! - **Stream Key**: `ingestion:jobs:stream`, entries carry a single `job_id` field
//! - **Consumer Group**: `ingestion_workers`, created with MKSTREAM on connect
//! - **Job Hash**: `ingestion:jobs:details:{job_id}`
//! - **Blob Key**: `ingestion:files:{job_id}`, expires after one hour
//! - **Dead-Letter List**: `ingestion:jobs:dlq`
//!
//! Enqueue writes blob, hash and stream entry in one MULTI/EXEC transaction, so
//! a crash never leaves a pointer to a job that was not written.
//!
//! Blocking XREADGROUP calls go through a dedicated connection per consumer;
//! everything else shares one auto-reconnecting `ConnectionManager`, so a
//! worker waiting on the stream never stalls status reads from the API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamClaimReply, StreamId, StreamReadReply};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use copilot_core::{DocumentId, JobId};
use copilot_ingestion::codec;
use copilot_ingestion::queue::FILE_CONTENT_TTL;
use copilot_ingestion::{
    BlobKey, DeadLetterEntry, EntryId, IngestionJob, IngestionQueue, JobStatus, LogEntry,
    NewUpload, PendingEntry, QueueError, QueueKeys, QueueResult, StatusUpdate,
};

/// Stream entry field holding the job pointer.
const ENTRY_JOB_ID_FIELD: &str = "job_id";

pub struct RedisIngestionQueue {
    client: redis::Client,
    keys: QueueKeys,
    file_ttl: Duration,
    manager: RwLock<Option<ConnectionManager>>,
    readers: Mutex<HashMap<String, MultiplexedConnection>>,
}

impl core::fmt::Debug for RedisIngestionQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisIngestionQueue")
            .field("keys", &self.keys)
            .field("file_ttl", &self.file_ttl)
            .finish_non_exhaustive()
    }
}

impl RedisIngestionQueue {
    /// Create a queue for `redis_url` (e.g. `redis://localhost:6379/0`).
    ///
    /// No connection is opened until [`IngestionQueue::connect`] or the first
    /// operation.
    pub fn new(redis_url: impl AsRef<str>) -> QueueResult<Self> {
        Self::with_keys(redis_url, QueueKeys::default())
    }

    pub fn with_keys(redis_url: impl AsRef<str>, keys: QueueKeys) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            keys,
            file_ttl: FILE_CONTENT_TTL,
            manager: RwLock::new(None),
            readers: Mutex::new(HashMap::new()),
        })
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    /// Shared connection, opened (and the consumer group ensured) on first use.
    async fn connection(&self) -> QueueResult<ConnectionManager> {
        if let Some(conn) = self.manager.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let mut guard = self.manager.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let mut conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        self.ensure_consumer_group(&mut conn).await?;

        info!(stream = %self.keys.stream, group = %self.keys.group, "connected to ingestion queue");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Dedicated connection for a consumer's blocking reads.
    async fn reader_connection(&self, consumer: &str) -> QueueResult<MultiplexedConnection> {
        let mut readers = self.readers.lock().await;
        if let Some(conn) = readers.get(consumer) {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        readers.insert(consumer.to_string(), conn.clone());
        Ok(conn)
    }

    /// Create the consumer group (and the stream) if absent.
    ///
    /// BUSYGROUP means another process got there first and counts as success.
    async fn ensure_consumer_group(&self, conn: &mut ConnectionManager) -> QueueResult<()> {
        // "0" so a freshly created group also sees entries appended before it existed
        let result: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.keys.stream)
            .arg(&self.keys.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match result {
            Ok(_) => {
                info!(group = %self.keys.group, "created ingestion consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::ConsumerGroup(e.to_string())),
        }
    }

    /// Recreate a group that vanished with its stream (FLUSHDB, key cleanup).
    async fn recover_missing_group(&self, e: &redis::RedisError) -> bool {
        if e.code() != Some("NOGROUP") {
            return false;
        }
        warn!(stream = %self.keys.stream, group = %self.keys.group, "consumer group missing; recreating");
        match self.connection().await {
            Ok(mut conn) => match self.ensure_consumer_group(&mut conn).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(error = %err, "failed to recreate consumer group");
                    false
                }
            },
            Err(err) => {
                warn!(error = %err, "failed to recreate consumer group");
                false
            }
        }
    }

    async fn job_exists(&self, conn: &mut ConnectionManager, job_id: &JobId) -> QueueResult<bool> {
        let exists: bool = redis::cmd("EXISTS")
            .arg(self.keys.job_key(job_id))
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(format!("EXISTS failed: {}", e)))?;
        Ok(exists)
    }
}

fn log_entry(stream_id: &StreamId) -> LogEntry {
    LogEntry {
        id: EntryId::new(stream_id.id.clone()),
        job_id: stream_id.get::<String>(ENTRY_JOB_ID_FIELD),
    }
}

#[async_trait]
impl IngestionQueue for RedisIngestionQueue {
    async fn connect(&self) -> QueueResult<()> {
        self.connection().await.map(|_| ())
    }

    async fn disconnect(&self) -> QueueResult<()> {
        let had_connection = self.manager.write().await.take().is_some();
        self.readers.lock().await.clear();
        if had_connection {
            info!("disconnected from ingestion queue");
        }
        Ok(())
    }

    #[instrument(skip(self, upload), fields(filename = %upload.filename), err)]
    async fn enqueue(&self, upload: NewUpload) -> QueueResult<JobId> {
        let mut conn = self.connection().await?;

        let job_id = JobId::new();
        let blob_key = self.keys.blob_key(&job_id);
        let job = IngestionJob::pending(job_id, DocumentId::new(), blob_key.clone(), &upload, Utc::now());

        let mut hset = redis::cmd("HSET");
        hset.arg(self.keys.job_key(&job_id));
        for (field, value) in codec::encode(&job) {
            hset.arg(field).arg(value);
        }

        let (entry_id,): (String,) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(blob_key.as_str())
            .arg(upload.file_content.as_slice())
            .arg("EX")
            .arg(self.file_ttl.as_secs())
            .ignore()
            .add_command(hset)
            .ignore()
            .cmd("XADD")
            .arg(&self.keys.stream)
            .arg("*")
            .arg(ENTRY_JOB_ID_FIELD)
            .arg(job_id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("enqueue transaction failed: {}", e)))?;

        info!(
            job_id = %job_id,
            document_id = %job.document_id,
            entry_id = %entry_id,
            "ingestion job enqueued"
        );
        Ok(job_id)
    }

    async fn get_job_status(&self, job_id: &JobId) -> QueueResult<Option<IngestionJob>> {
        let mut conn = self.connection().await?;

        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.keys.job_key(job_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("HGETALL failed: {}", e)))?;

        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(codec::decode(&fields)?))
    }

    async fn update_job_status(&self, job_id: &JobId, update: &StatusUpdate) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        if !self.job_exists(&mut conn, job_id).await? {
            return Err(QueueError::JobNotFound(*job_id));
        }

        let mut cmd = redis::cmd("HSET");
        cmd.arg(self.keys.job_key(job_id));
        for (field, value) in codec::encode_update(update, Utc::now()) {
            cmd.arg(field).arg(value);
        }
        let _: u64 = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("HSET failed: {}", e)))?;

        debug!(job_id = %job_id, status = %update.status, "job status updated");
        Ok(())
    }

    async fn get_file_content(&self, key: &BlobKey) -> QueueResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;

        let bytes: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("GET failed: {}", e)))?;
        Ok(bytes)
    }

    async fn delete_file_content(&self, key: &BlobKey) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let _: u64 = redis::cmd("DEL")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("DEL failed: {}", e)))?;
        Ok(())
    }

    async fn increment_retry(&self, job_id: &JobId) -> QueueResult<u32> {
        let mut conn = self.connection().await?;
        if !self.job_exists(&mut conn, job_id).await? {
            return Err(QueueError::JobNotFound(*job_id));
        }

        let job_key = self.keys.job_key(job_id);
        let (retry_count,): (u32,) = redis::pipe()
            .atomic()
            .cmd("HINCRBY")
            .arg(&job_key)
            .arg(codec::FIELD_RETRY_COUNT)
            .arg(1)
            .cmd("HSET")
            .arg(&job_key)
            .arg(codec::FIELD_STATUS)
            .arg(JobStatus::Retrying.as_str())
            .arg(codec::FIELD_UPDATED_AT)
            .arg(codec::encode_timestamp(Utc::now()))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("retry increment failed: {}", e)))?;

        Ok(retry_count)
    }

    async fn move_to_dlq(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let entry = DeadLetterEntry {
            job_id: *job_id,
            error: error.to_string(),
            failed_at: Utc::now(),
        };
        let payload =
            serde_json::to_string(&entry).map_err(|e| QueueError::Serialization(e.to_string()))?;

        let _: u64 = redis::cmd("LPUSH")
            .arg(&self.keys.dlq)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("DLQ LPUSH failed: {}", e)))?;

        self.update_job_status(job_id, &StatusUpdate::failed(error)).await?;

        warn!(job_id = %job_id, error, "ingestion job moved to dead-letter list");
        Ok(())
    }

    async fn list_dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetterEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;

        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.keys.dlq)
            .arg(0)
            .arg(limit as i64 - 1)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("LRANGE failed: {}", e)))?;

        Ok(raw
            .iter()
            .filter_map(|payload| match serde_json::from_str(payload) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping malformed dead-letter record");
                    None
                }
            })
            .collect())
    }

    async fn read_batch(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> QueueResult<Vec<LogEntry>> {
        // make sure the group exists before the first read
        self.connection().await?;
        let mut conn = self.reader_connection(consumer).await?;

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.keys.group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count);
        if !block.is_zero() {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(&self.keys.stream).arg(">");

        let reply: Option<StreamReadReply> = match cmd.query_async(&mut conn).await {
            Ok(reply) => reply,
            Err(e) if self.recover_missing_group(&e).await => return Ok(Vec::new()),
            Err(e) => {
                // drop the connection so the next read reconnects
                self.readers.lock().await.remove(consumer);
                return Err(QueueError::Command(format!("XREADGROUP failed: {}", e)));
            }
        };

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .iter()
                    .flat_map(|key| key.ids.iter().map(log_entry))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_pointer(&self, job_id: &JobId) -> QueueResult<EntryId> {
        let mut conn = self.connection().await?;

        let id: String = redis::cmd("XADD")
            .arg(&self.keys.stream)
            .arg("*")
            .arg(ENTRY_JOB_ID_FIELD)
            .arg(job_id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XADD failed: {}", e)))?;
        Ok(EntryId::new(id))
    }

    async fn acknowledge(&self, entry: &EntryId) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let _: u64 = redis::cmd("XACK")
            .arg(&self.keys.stream)
            .arg(&self.keys.group)
            .arg(entry.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XACK failed: {}", e)))?;
        Ok(())
    }

    async fn pending_entries(&self, limit: usize) -> QueueResult<Vec<PendingEntry>> {
        let mut conn = self.connection().await?;

        // (entry id, consumer, idle ms, delivery count)
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.keys.stream)
            .arg(&self.keys.group)
            .arg("-")
            .arg("+")
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XPENDING failed: {}", e)))?;

        Ok(pending
            .into_iter()
            .map(|(id, consumer, idle_ms, delivery_count)| PendingEntry {
                entry_id: EntryId::new(id),
                consumer,
                idle_ms,
                delivery_count,
            })
            .collect())
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<LogEntry>> {
        let mut conn = self.connection().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: Vec<(String, String, u64, u64)> = match redis::cmd("XPENDING")
            .arg(&self.keys.stream)
            .arg(&self.keys.group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await
        {
            Ok(pending) => pending,
            Err(e) if self.recover_missing_group(&e).await => return Ok(Vec::new()),
            Err(e) => return Err(QueueError::Command(format!("XPENDING failed: {}", e))),
        };

        if pending.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = pending.into_iter().map(|(id, _, _, _)| id).collect();

        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.keys.stream)
            .arg(&self.keys.group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&ids[..])
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XCLAIM failed: {}", e)))?;

        if !claimed.ids.is_empty() {
            info!(consumer, claimed = claimed.ids.len(), "claimed stale ingestion entries");
        }
        Ok(claimed.ids.iter().map(log_entry).collect())
    }
}
