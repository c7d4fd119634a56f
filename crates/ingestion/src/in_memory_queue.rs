//! In-memory ingestion queue for tests/dev.
//!
//! Models the same stores as the Redis backend:
//!
//! - Status records kept as flat string maps (written through the codec)
//! - Blobs with a per-key expiry
//! - A single consumer group over an append-only log (cursor + pending list)
//! - A dead-letter list, newest first
//!
//! State lives behind one mutex that is never held across an `.await`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;

use copilot_core::{DocumentId, JobId};

use crate::codec;
use crate::job::{BlobKey, IngestionJob, JobStatus, NewUpload, StatusUpdate};
use crate::queue::{
    DeadLetterEntry, EntryId, FILE_CONTENT_TTL, IngestionQueue, LogEntry, PendingEntry,
    QueueError, QueueKeys, QueueResult,
};

#[derive(Debug)]
struct StoredBlob {
    bytes: Vec<u8>,
    expires_at: Instant,
}

#[derive(Debug)]
struct Delivery {
    entry: LogEntry,
    seq: u64,
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct State {
    connected: bool,
    jobs: HashMap<String, HashMap<String, String>>,
    blobs: HashMap<String, StoredBlob>,
    log: Vec<(u64, LogEntry)>,
    next_seq: u64,
    /// Index of the first log entry never delivered to the group.
    cursor: usize,
    pending: HashMap<EntryId, Delivery>,
    dead_letters: VecDeque<String>,
}

impl State {
    fn append(&mut self, job_id: &JobId) -> EntryId {
        self.next_seq += 1;
        let id = EntryId::new(format!("{}-{}", Utc::now().timestamp_millis(), self.next_seq));
        self.log.push((
            self.next_seq,
            LogEntry {
                id: id.clone(),
                job_id: Some(job_id.to_string()),
            },
        ));
        id
    }

    fn deliver_new(&mut self, consumer: &str, count: usize) -> Vec<LogEntry> {
        let end = (self.cursor + count).min(self.log.len());
        let now = Instant::now();
        let batch: Vec<(u64, LogEntry)> = self.log[self.cursor..end].to_vec();
        self.cursor = end;

        batch
            .into_iter()
            .map(|(seq, entry)| {
                self.pending.insert(
                    entry.id.clone(),
                    Delivery {
                        entry: entry.clone(),
                        seq,
                        consumer: consumer.to_string(),
                        delivered_at: now,
                        delivery_count: 1,
                    },
                );
                entry
            })
            .collect()
    }

    fn live_blob(&mut self, key: &str) -> Option<&StoredBlob> {
        let expired = self
            .blobs
            .get(key)
            .is_some_and(|blob| blob.expires_at <= Instant::now());
        if expired {
            self.blobs.remove(key);
        }
        self.blobs.get(key)
    }
}

/// In-process [`IngestionQueue`].
#[derive(Debug)]
pub struct InMemoryIngestionQueue {
    keys: QueueKeys,
    file_ttl: Duration,
    state: Mutex<State>,
    appended: Notify,
}

impl Default for InMemoryIngestionQueue {
    fn default() -> Self {
        Self {
            keys: QueueKeys::default(),
            file_ttl: FILE_CONTENT_TTL,
            state: Mutex::new(State::default()),
            appended: Notify::new(),
        }
    }
}

impl InMemoryIngestionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override how long uploaded bytes live.
    pub fn with_file_ttl(mut self, ttl: Duration) -> Self {
        self.file_ttl = ttl;
        self
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().map(|s| s.connected).unwrap_or(false)
    }

    /// Drop stored bytes as if their TTL had elapsed.
    pub fn expire_file_content(&self, key: &BlobKey) -> QueueResult<()> {
        self.lock()?.blobs.remove(key.as_str());
        Ok(())
    }

    /// Number of entries ever appended to the log.
    pub fn log_len(&self) -> QueueResult<usize> {
        Ok(self.lock()?.log.len())
    }

    fn lock(&self) -> QueueResult<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        state.connected = true;
        Ok(state)
    }
}

#[async_trait]
impl IngestionQueue for InMemoryIngestionQueue {
    async fn connect(&self) -> QueueResult<()> {
        self.lock().map(|_| ())
    }

    async fn disconnect(&self) -> QueueResult<()> {
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        state.connected = false;
        Ok(())
    }

    async fn enqueue(&self, upload: NewUpload) -> QueueResult<JobId> {
        let job_id = JobId::new();
        let blob_key = self.keys.blob_key(&job_id);
        let job = IngestionJob::pending(job_id, DocumentId::new(), blob_key.clone(), &upload, Utc::now());

        {
            let mut state = self.lock()?;
            state.blobs.insert(
                blob_key.as_str().to_string(),
                StoredBlob {
                    bytes: upload.file_content,
                    expires_at: Instant::now() + self.file_ttl,
                },
            );
            let record = codec::encode(&job)
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
            state.jobs.insert(self.keys.job_key(&job_id), record);
            state.append(&job_id);
        }
        self.appended.notify_waiters();

        tracing::info!(job_id = %job_id, filename = %job.filename, "ingestion job enqueued");
        Ok(job_id)
    }

    async fn get_job_status(&self, job_id: &JobId) -> QueueResult<Option<IngestionJob>> {
        let state = self.lock()?;
        match state.jobs.get(&self.keys.job_key(job_id)) {
            Some(fields) => Ok(Some(codec::decode(fields)?)),
            None => Ok(None),
        }
    }

    async fn update_job_status(&self, job_id: &JobId, update: &StatusUpdate) -> QueueResult<()> {
        let mut state = self.lock()?;
        let record = state
            .jobs
            .get_mut(&self.keys.job_key(job_id))
            .ok_or(QueueError::JobNotFound(*job_id))?;
        for (field, value) in codec::encode_update(update, Utc::now()) {
            record.insert(field.to_string(), value);
        }
        Ok(())
    }

    async fn get_file_content(&self, key: &BlobKey) -> QueueResult<Option<Vec<u8>>> {
        let mut state = self.lock()?;
        Ok(state.live_blob(key.as_str()).map(|blob| blob.bytes.clone()))
    }

    async fn delete_file_content(&self, key: &BlobKey) -> QueueResult<()> {
        self.lock()?.blobs.remove(key.as_str());
        Ok(())
    }

    async fn increment_retry(&self, job_id: &JobId) -> QueueResult<u32> {
        let mut state = self.lock()?;
        let record = state
            .jobs
            .get_mut(&self.keys.job_key(job_id))
            .ok_or(QueueError::JobNotFound(*job_id))?;

        let current: u32 = record
            .get(codec::FIELD_RETRY_COUNT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let next = current + 1;
        record.insert(codec::FIELD_RETRY_COUNT.to_string(), next.to_string());
        for (field, value) in codec::encode_update(&StatusUpdate::new(JobStatus::Retrying), Utc::now()) {
            record.insert(field.to_string(), value);
        }
        Ok(next)
    }

    async fn move_to_dlq(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        let entry = DeadLetterEntry {
            job_id: *job_id,
            error: error.to_string(),
            failed_at: Utc::now(),
        };
        let payload =
            serde_json::to_string(&entry).map_err(|e| QueueError::Serialization(e.to_string()))?;
        self.lock()?.dead_letters.push_front(payload);

        self.update_job_status(job_id, &StatusUpdate::failed(error)).await?;
        tracing::warn!(job_id = %job_id, error, "ingestion job moved to dead-letter list");
        Ok(())
    }

    async fn list_dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetterEntry>> {
        let state = self.lock()?;
        Ok(state
            .dead_letters
            .iter()
            .take(limit)
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect())
    }

    async fn read_batch(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> QueueResult<Vec<LogEntry>> {
        let deadline = Instant::now() + block;
        loop {
            // Register interest before checking so an append in between is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self.lock()?.deliver_new(consumer, count);
            if !entries.is_empty() || block.is_zero() {
                return Ok(entries);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn append_pointer(&self, job_id: &JobId) -> QueueResult<EntryId> {
        let id = self.lock()?.append(job_id);
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn acknowledge(&self, entry: &EntryId) -> QueueResult<()> {
        self.lock()?.pending.remove(entry);
        Ok(())
    }

    async fn pending_entries(&self, limit: usize) -> QueueResult<Vec<PendingEntry>> {
        let state = self.lock()?;
        let now = Instant::now();
        let mut deliveries: Vec<&Delivery> = state.pending.values().collect();
        deliveries.sort_by_key(|d| d.seq);
        Ok(deliveries
            .into_iter()
            .take(limit)
            .map(|d| PendingEntry {
                entry_id: d.entry.id.clone(),
                consumer: d.consumer.clone(),
                idle_ms: now.duration_since(d.delivered_at).as_millis() as u64,
                delivery_count: d.delivery_count,
            })
            .collect())
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<LogEntry>> {
        let mut state = self.lock()?;
        let now = Instant::now();
        let mut stale: Vec<&mut Delivery> = state
            .pending
            .values_mut()
            .filter(|d| now.duration_since(d.delivered_at) >= min_idle)
            .collect();
        stale.sort_by_key(|d| d.seq);

        Ok(stale
            .into_iter()
            .take(count)
            .map(|d| {
                d.consumer = consumer.to_string();
                d.delivered_at = now;
                d.delivery_count += 1;
                d.entry.clone()
            })
            .collect())
    }
}
