//! Ingestion worker: consumes the job log and drives jobs to a terminal status.
//!
//! One worker is one tokio task reading through the queue's consumer group.
//! Several workers (distinct consumer names) can share a group; each log entry
//! is delivered to one of them at a time.
//!
//! ```text
//! Idle ─read─▶ Reading ─entries─▶ Claiming ─job found─▶ Processing ─ok──▶ Completing ─▶ Idle
//!                  │                  │                      │
//!                  └─timeout─▶ Idle   └─orphan: ack─▶ Idle   └─err─▶ Failing ─▶ Idle
//! ```
//!
//! Failure handling:
//! - transient failure: `retrying`, sleep `min(2^retry_count, 30)` s, append a fresh
//!   pointer, acknowledge the original entry
//! - retries exhausted: dead-letter, `failed`, acknowledge
//! - content expired: same bookkeeping as any other failure, unless
//!   `dead_letter_expired_content` is set, in which case it is dead-lettered at once
//! - job already `completed` or `failed` (a repeat delivery): acknowledged untouched
//! - record missing or malformed mid-flight: acknowledged as an orphan
//! - other queue bookkeeping failure: logged, entry left pending for redelivery
//!
//! `reclaim_after` must exceed the longest backoff sleep, or a live owner's
//! entry can be taken over while it waits to retry.
//!
//! Stopping the worker drops the in-flight iteration. Side effects already
//! written stay; the entry stays pending.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use copilot_core::JobId;
use copilot_ingestion::{
    DocumentProcessor, EntryId, IngestionJob, IngestionQueue, LogEntry, ProcessOutcome,
    ProcessRequest, ProcessorError, QueueError, QueueResult, RetryPolicy, StatusUpdate,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerConfigError {
    #[error("reclaim_after ({reclaim_after:?}) must exceed the longest retry backoff ({max_backoff:?})")]
    ReclaimTooShort {
        reclaim_after: Duration,
        max_backoff: Duration,
    },
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct IngestionWorkerConfig {
    /// Consumer name within the group; must be unique per live worker.
    pub consumer_name: String,
    /// Max entries per read
    pub batch_size: usize,
    /// How long a read waits for new entries
    pub block: Duration,
    /// Pause after a failed read
    pub error_backoff: Duration,
    pub retry_policy: RetryPolicy,
    /// Take over entries pending on other consumers for at least this long.
    /// `None` disables reclaiming.
    pub reclaim_after: Option<Duration>,
    /// Skip the retry budget when the uploaded bytes are already gone.
    pub dead_letter_expired_content: bool,
}

impl Default for IngestionWorkerConfig {
    fn default() -> Self {
        let suffix = Uuid::now_v7().simple().to_string();
        Self {
            consumer_name: format!("worker-{}", &suffix[suffix.len() - 8..]),
            batch_size: 5,
            block: Duration::from_millis(5000),
            error_backoff: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
            reclaim_after: None,
            dead_letter_expired_content: false,
        }
    }
}

impl IngestionWorkerConfig {
    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_reclaim_after(mut self, min_idle: Duration) -> Self {
        self.reclaim_after = Some(min_idle);
        self
    }

    pub fn with_dead_letter_expired_content(mut self, enabled: bool) -> Self {
        self.dead_letter_expired_content = enabled;
        self
    }

    /// Reject a reclaim window short enough to steal entries from a worker
    /// that is still sleeping before a retry.
    pub fn validate(&self) -> Result<(), WorkerConfigError> {
        let max_backoff = self.retry_policy.max_backoff;
        match self.reclaim_after {
            Some(reclaim_after) if reclaim_after <= max_backoff => {
                Err(WorkerConfigError::ReclaimTooShort {
                    reclaim_after,
                    max_backoff,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Where the worker currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Idle,
    Reading,
    Claiming,
    Processing,
    Completing,
    Failing,
    Stopped,
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub state: WorkerState,
    pub jobs_processed: u64,
    pub jobs_completed: u64,
    pub jobs_retried: u64,
    pub jobs_dead_lettered: u64,
    pub orphans_acknowledged: u64,
    pub read_errors: u64,
}

/// Why a single processing attempt failed.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("file content no longer available (expired or deleted)")]
    ContentExpired,

    #[error("{0}")]
    Processor(#[from] ProcessorError),
}

impl JobFailure {
    /// Retrying cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, JobFailure::ContentExpired)
    }
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct IngestionWorkerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl IngestionWorkerHandle {
    /// Signal shutdown and wait for the task to exit.
    ///
    /// The in-flight iteration is cancelled, not drained.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(error = %e, "ingestion worker task ended abnormally");
            }
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Background ingestion worker.
pub struct IngestionWorker {
    queue: Arc<dyn IngestionQueue>,
    processor: Arc<dyn DocumentProcessor>,
    config: IngestionWorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl IngestionWorker {
    pub fn new(
        queue: Arc<dyn IngestionQueue>,
        processor: Arc<dyn DocumentProcessor>,
        config: IngestionWorkerConfig,
    ) -> Result<Self, WorkerConfigError> {
        config.validate()?;
        Ok(Self {
            queue,
            processor,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        })
    }

    pub fn config(&self) -> &IngestionWorkerConfig {
        &self.config
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Spawn the worker loop on the current tokio runtime.
    pub fn spawn(self) -> IngestionWorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let join = tokio::spawn(self.run(shutdown_rx));

        IngestionWorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(consumer = %self.config.consumer_name, "ingestion worker started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = self.run_once() => {
                    if let Err(e) = result {
                        self.record(|s| {
                            s.read_errors += 1;
                            s.state = WorkerState::Idle;
                        });
                        error!(consumer = %self.config.consumer_name, error = %e, "failed to read ingestion log");
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(self.config.error_backoff) => {}
                        }
                    }
                }
            }
        }

        self.record(|s| s.state = WorkerState::Stopped);
        info!(consumer = %self.config.consumer_name, "ingestion worker stopped");
    }

    /// One read-and-dispatch cycle. Returns the number of entries handled.
    ///
    /// Errors are read errors only; per-job failures are handled (and logged)
    /// inside the cycle.
    pub async fn run_once(&self) -> QueueResult<usize> {
        let consumer = self.config.consumer_name.as_str();
        self.record(|s| s.state = WorkerState::Reading);

        let mut entries = Vec::new();
        if let Some(min_idle) = self.config.reclaim_after {
            entries = self
                .queue
                .claim_stale(consumer, min_idle, self.config.batch_size)
                .await?;
        }
        if entries.is_empty() {
            entries = self
                .queue
                .read_batch(consumer, self.config.batch_size, self.config.block)
                .await?;
        }

        let handled = entries.len();
        for entry in entries {
            self.handle_entry(entry).await;
        }

        self.record(|s| s.state = WorkerState::Idle);
        Ok(handled)
    }

    async fn handle_entry(&self, entry: LogEntry) {
        self.record(|s| s.state = WorkerState::Claiming);

        let job_id = match entry.job_id.as_deref().map(str::parse::<JobId>) {
            Some(Ok(job_id)) => job_id,
            _ => {
                warn!(entry_id = %entry.id, raw_job_id = ?entry.job_id, "log entry without a valid job_id; acknowledging");
                self.acknowledge_orphan(&entry.id).await;
                return;
            }
        };

        let span = info_span!(
            "ingestion_job",
            job_id = %job_id,
            entry_id = %entry.id,
            consumer = %self.config.consumer_name
        );
        match self.dispatch(job_id, &entry.id).instrument(span).await {
            Ok(()) => {}
            Err(e) if is_unusable_record(&e) => {
                warn!(job_id = %job_id, entry_id = %entry.id, error = %e, "job record unusable; acknowledging");
                self.acknowledge_orphan(&entry.id).await;
            }
            Err(e) => {
                error!(job_id = %job_id, entry_id = %entry.id, error = %e, "ingestion bookkeeping failed; entry left pending");
            }
        }
    }

    async fn acknowledge_orphan(&self, entry_id: &EntryId) {
        match self.queue.acknowledge(entry_id).await {
            Ok(()) => self.record(|s| s.orphans_acknowledged += 1),
            Err(e) => error!(entry_id = %entry_id, error = %e, "failed to acknowledge orphan entry"),
        }
    }

    async fn dispatch(&self, job_id: JobId, entry_id: &EntryId) -> QueueResult<()> {
        let Some(job) = self.queue.get_job_status(&job_id).await? else {
            warn!("job record not found; acknowledging entry");
            self.acknowledge_orphan(entry_id).await;
            return Ok(());
        };
        if job.status.is_terminal() {
            info!(status = %job.status, "job already finished; acknowledging repeat delivery");
            self.queue.acknowledge(entry_id).await?;
            return Ok(());
        }

        self.record(|s| {
            s.state = WorkerState::Processing;
            s.jobs_processed += 1;
        });
        self.queue
            .update_job_status(&job_id, &StatusUpdate::processing())
            .await?;

        let started = Instant::now();
        match self.attempt(&job).await? {
            Ok(outcome) => self.complete(&job, entry_id, outcome, started.elapsed()).await,
            Err(failure) => self.fail(&job, entry_id, failure).await,
        }
    }

    /// Fetch the bytes and run the processor. The outer error is a queue error.
    async fn attempt(&self, job: &IngestionJob) -> QueueResult<Result<ProcessOutcome, JobFailure>> {
        let Some(file_content) = self.queue.get_file_content(&job.blob_key).await? else {
            return Ok(Err(JobFailure::ContentExpired));
        };

        let request = ProcessRequest {
            document_id: job.document_id,
            filename: job.filename.clone(),
            file_content,
            title: job.title.clone(),
            department: job.department.clone(),
            access_role: job.access_role.clone(),
            metadata: job.metadata.clone(),
        };
        Ok(self.processor.process(request).await.map_err(JobFailure::from))
    }

    async fn complete(
        &self,
        job: &IngestionJob,
        entry_id: &EntryId,
        outcome: ProcessOutcome,
        elapsed: Duration,
    ) -> QueueResult<()> {
        self.record(|s| s.state = WorkerState::Completing);
        let processing_time_ms = elapsed.as_secs_f64() * 1000.0;

        self.queue
            .update_job_status(
                &job.job_id,
                &StatusUpdate::completed(outcome.chunks_created, processing_time_ms),
            )
            .await?;
        if let Err(e) = self.queue.delete_file_content(&job.blob_key).await {
            warn!(blob_key = %job.blob_key, error = %e, "failed to delete file content; it will expire");
        }
        self.queue.acknowledge(entry_id).await?;

        self.record(|s| s.jobs_completed += 1);
        info!(
            chunks_created = outcome.chunks_created,
            processing_time_ms,
            "ingestion job completed"
        );
        Ok(())
    }

    async fn fail(&self, job: &IngestionJob, entry_id: &EntryId, failure: JobFailure) -> QueueResult<()> {
        self.record(|s| s.state = WorkerState::Failing);
        let message = failure.to_string();

        let retry_count = self.queue.increment_retry(&job.job_id).await?;
        self.queue
            .update_job_status(&job.job_id, &StatusUpdate::retrying(&message))
            .await?;

        let policy = &self.config.retry_policy;
        let give_up = self.config.dead_letter_expired_content && failure.is_permanent();
        if give_up || !policy.should_retry(retry_count) {
            self.queue.move_to_dlq(&job.job_id, &message).await?;
            self.queue.acknowledge(entry_id).await?;
            self.record(|s| s.jobs_dead_lettered += 1);
            error!(retry_count, error = %message, "ingestion job failed");
            return Ok(());
        }

        let delay = policy.backoff_for(retry_count);
        warn!(
            retry_count,
            delay_ms = delay.as_millis() as u64,
            error = %message,
            "ingestion job failed; scheduling retry"
        );
        tokio::time::sleep(delay).await;

        self.queue.append_pointer(&job.job_id).await?;
        self.queue.acknowledge(entry_id).await?;
        self.record(|s| s.jobs_retried += 1);
        Ok(())
    }

    fn record(&self, update: impl FnOnce(&mut WorkerStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut stats);
    }
}

/// The record vanished or cannot be decoded; redelivery cannot help.
fn is_unusable_record(e: &QueueError) -> bool {
    matches!(e, QueueError::Codec(_) | QueueError::JobNotFound(_))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use copilot_ingestion::{
        BlobKey, CodecError, DeadLetterEntry, InMemoryIngestionQueue, JobStatus, NewUpload,
        PendingEntry,
    };

    use super::*;

    /// Processor that replays a script of results, then succeeds.
    struct Scripted {
        script: Mutex<VecDeque<Result<u32, ProcessorError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(script: Vec<Result<u32, ProcessorError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl DocumentProcessor for Scripted {
        async fn process(&self, _request: ProcessRequest) -> Result<ProcessOutcome, ProcessorError> {
            *self.calls.lock().unwrap() += 1;
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(1));
            next.map(|chunks_created| ProcessOutcome {
                chunks_created,
                processing_time_ms: 1.0,
            })
        }
    }

    fn config() -> IngestionWorkerConfig {
        IngestionWorkerConfig::default()
            .with_consumer_name("test-worker")
            .with_block(Duration::ZERO)
    }

    async fn enqueue(queue: &InMemoryIngestionQueue) -> JobId {
        queue
            .enqueue(NewUpload::new("doc.txt", b"hello world".to_vec(), "Doc", "eng"))
            .await
            .unwrap()
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = IngestionWorkerConfig::default();
        assert!(config.consumer_name.starts_with("worker-"));
        assert_eq!(config.consumer_name.len(), "worker-".len() + 8);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.block, Duration::from_secs(5));
        assert_eq!(config.retry_policy.max_retries, 3);
        assert!(config.reclaim_after.is_none());
        assert!(!config.dead_letter_expired_content);
    }

    #[tokio::test]
    async fn successful_job_completes_and_cleans_up() {
        let queue = Arc::new(InMemoryIngestionQueue::new());
        let processor = Scripted::new(vec![Ok(7)]);
        let worker = IngestionWorker::new(queue.clone(), processor.clone(), config()).unwrap();

        let job_id = enqueue(&queue).await;
        assert_eq!(worker.run_once().await.unwrap(), 1);

        let job = queue.get_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.chunks_created, 7);
        assert!(job.processing_time_ms >= 0.0);
        assert_eq!(queue.get_file_content(&job.blob_key).await.unwrap(), None);
        assert!(queue.pending_entries(10).await.unwrap().is_empty());
        assert_eq!(worker.stats().jobs_completed, 1);
        assert_eq!(worker.stats().state, WorkerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_with_fresh_pointer() {
        let queue = Arc::new(InMemoryIngestionQueue::new());
        let processor = Scripted::new(vec![Err(ProcessorError::Failed("flaky".into()))]);
        let worker = IngestionWorker::new(queue.clone(), processor.clone(), config()).unwrap();

        let job_id = enqueue(&queue).await;
        worker.run_once().await.unwrap();

        let job = queue.get_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.error_message.as_deref(), Some("flaky"));
        assert_eq!(queue.log_len().unwrap(), 2);
        assert!(queue.pending_entries(10).await.unwrap().is_empty());

        worker.run_once().await.unwrap();
        let job = queue.get_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.error_message, None);
        assert_eq!(processor.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_waits_for_backoff() {
        let queue = Arc::new(InMemoryIngestionQueue::new());
        let processor = Scripted::new(vec![Err(ProcessorError::Failed("flaky".into()))]);
        let worker = IngestionWorker::new(queue.clone(), processor, config()).unwrap();

        enqueue(&queue).await;
        let started = tokio::time::Instant::now();
        worker.run_once().await.unwrap();
        // first failure -> retry_count 1 -> 2^1 seconds
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_content_uses_the_retry_budget() {
        let queue = Arc::new(InMemoryIngestionQueue::new());
        let processor = Scripted::new(vec![]);
        let worker = IngestionWorker::new(queue.clone(), processor.clone(), config()).unwrap();

        let job_id = enqueue(&queue).await;
        queue.expire_file_content(&queue.keys().blob_key(&job_id)).unwrap();
        worker.run_once().await.unwrap();

        let job = queue.get_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.retry_count, 1);
        assert!(job.error_message.unwrap().contains("no longer available"));
        assert_eq!(processor.calls(), 0);
        assert!(queue.list_dead_letters(10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_content_can_skip_retries() {
        let queue = Arc::new(InMemoryIngestionQueue::new());
        let processor = Scripted::new(vec![]);
        let worker = IngestionWorker::new(
            queue.clone(),
            processor.clone(),
            config().with_dead_letter_expired_content(true),
        )
        .unwrap();

        let job_id = enqueue(&queue).await;
        queue.expire_file_content(&queue.keys().blob_key(&job_id)).unwrap();
        worker.run_once().await.unwrap();

        let job = queue.get_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("no longer available"));
        assert_eq!(processor.calls(), 0);
        assert_eq!(queue.list_dead_letters(10).await.unwrap().len(), 1);
        assert!(queue.pending_entries(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn orphan_entries_are_acknowledged() {
        let queue = Arc::new(InMemoryIngestionQueue::new());
        let worker = IngestionWorker::new(queue.clone(), Scripted::new(vec![]), config()).unwrap();

        queue.append_pointer(&JobId::new()).await.unwrap();
        assert_eq!(worker.run_once().await.unwrap(), 1);

        assert!(queue.pending_entries(10).await.unwrap().is_empty());
        assert_eq!(worker.stats().orphans_acknowledged, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reclaim_picks_up_entries_of_a_dead_consumer() {
        let queue = Arc::new(InMemoryIngestionQueue::new());
        let job_id = enqueue(&queue).await;
        // a consumer that read the entry and died
        queue.read_batch("crashed", 5, Duration::ZERO).await.unwrap();

        let worker = IngestionWorker::new(
            queue.clone(),
            Scripted::new(vec![]),
            config().with_reclaim_after(Duration::from_secs(60)),
        )
        .unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(worker.run_once().await.unwrap(), 1);

        let job = queue.get_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn spawned_worker_processes_and_stops() {
        let queue = Arc::new(InMemoryIngestionQueue::new());
        let worker = IngestionWorker::new(
            queue.clone(),
            Scripted::new(vec![]),
            config().with_block(Duration::from_millis(20)),
        )
        .unwrap();
        let handle = worker.spawn();

        let job_id = enqueue(&queue).await;
        for _ in 0..100 {
            if handle.stats().jobs_completed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.stats().jobs_completed, 1);
        let job = queue.get_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        handle.stop().await;
    }

    #[test]
    fn reclaim_window_must_outlast_the_longest_backoff() {
        let too_short = config().with_reclaim_after(Duration::from_secs(30));
        assert_eq!(
            too_short.validate(),
            Err(WorkerConfigError::ReclaimTooShort {
                reclaim_after: Duration::from_secs(30),
                max_backoff: Duration::from_secs(30),
            })
        );
        assert!(
            IngestionWorker::new(
                Arc::new(InMemoryIngestionQueue::new()),
                Scripted::new(vec![]),
                too_short,
            )
            .is_err()
        );

        assert!(config().with_reclaim_after(Duration::from_secs(31)).validate().is_ok());
        // a shorter backoff cap allows a shorter window
        let quick = config()
            .with_retry_policy(
                RetryPolicy::default().with_backoff(Duration::from_millis(10), Duration::from_secs(1)),
            )
            .with_reclaim_after(Duration::from_secs(5));
        assert!(quick.validate().is_ok());
        assert!(config().validate().is_ok());
    }

    #[tokio::test]
    async fn repeat_delivery_of_a_finished_job_is_acknowledged_untouched() {
        let queue = Arc::new(InMemoryIngestionQueue::new());
        let processor = Scripted::new(vec![Ok(3)]);
        let worker = IngestionWorker::new(queue.clone(), processor.clone(), config()).unwrap();

        let job_id = enqueue(&queue).await;
        worker.run_once().await.unwrap();
        queue.append_pointer(&job_id).await.unwrap();
        assert_eq!(worker.run_once().await.unwrap(), 1);

        let job = queue.get_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.chunks_created, 3);
        assert_eq!(processor.calls(), 1);
        assert!(queue.pending_entries(10).await.unwrap().is_empty());
        assert!(queue.list_dead_letters(10).await.unwrap().is_empty());
        assert_eq!(worker.stats().jobs_processed, 1);
    }

    /// How [`Unusable`] breaks the job record.
    #[derive(Clone, Copy)]
    enum Breakage {
        /// The stored hash fails to decode.
        Malformed,
        /// The record disappears after the lookup.
        Vanishes,
    }

    /// In-memory queue whose job records cannot be used.
    struct Unusable {
        inner: InMemoryIngestionQueue,
        breakage: Breakage,
    }

    #[async_trait]
    impl IngestionQueue for Unusable {
        async fn connect(&self) -> QueueResult<()> {
            self.inner.connect().await
        }

        async fn disconnect(&self) -> QueueResult<()> {
            self.inner.disconnect().await
        }

        async fn enqueue(&self, upload: NewUpload) -> QueueResult<JobId> {
            self.inner.enqueue(upload).await
        }

        async fn get_job_status(&self, job_id: &JobId) -> QueueResult<Option<IngestionJob>> {
            match self.breakage {
                Breakage::Malformed => Err(CodecError::MissingField("status").into()),
                Breakage::Vanishes => self.inner.get_job_status(job_id).await,
            }
        }

        async fn update_job_status(&self, job_id: &JobId, update: &StatusUpdate) -> QueueResult<()> {
            match self.breakage {
                Breakage::Vanishes => Err(QueueError::JobNotFound(*job_id)),
                Breakage::Malformed => self.inner.update_job_status(job_id, update).await,
            }
        }

        async fn get_file_content(&self, key: &BlobKey) -> QueueResult<Option<Vec<u8>>> {
            self.inner.get_file_content(key).await
        }

        async fn delete_file_content(&self, key: &BlobKey) -> QueueResult<()> {
            self.inner.delete_file_content(key).await
        }

        async fn increment_retry(&self, job_id: &JobId) -> QueueResult<u32> {
            self.inner.increment_retry(job_id).await
        }

        async fn move_to_dlq(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
            self.inner.move_to_dlq(job_id, error).await
        }

        async fn list_dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetterEntry>> {
            self.inner.list_dead_letters(limit).await
        }

        async fn read_batch(
            &self,
            consumer: &str,
            count: usize,
            block: Duration,
        ) -> QueueResult<Vec<LogEntry>> {
            self.inner.read_batch(consumer, count, block).await
        }

        async fn append_pointer(&self, job_id: &JobId) -> QueueResult<EntryId> {
            self.inner.append_pointer(job_id).await
        }

        async fn acknowledge(&self, entry: &EntryId) -> QueueResult<()> {
            self.inner.acknowledge(entry).await
        }

        async fn pending_entries(&self, limit: usize) -> QueueResult<Vec<PendingEntry>> {
            self.inner.pending_entries(limit).await
        }

        async fn claim_stale(
            &self,
            consumer: &str,
            min_idle: Duration,
            count: usize,
        ) -> QueueResult<Vec<LogEntry>> {
            self.inner.claim_stale(consumer, min_idle, count).await
        }
    }

    #[tokio::test]
    async fn unusable_records_do_not_block_the_group() {
        for breakage in [Breakage::Malformed, Breakage::Vanishes] {
            let queue = Arc::new(Unusable {
                inner: InMemoryIngestionQueue::new(),
                breakage,
            });
            let processor = Scripted::new(vec![]);
            let worker = IngestionWorker::new(queue.clone(), processor.clone(), config()).unwrap();

            queue
                .enqueue(NewUpload::new("doc.txt", b"hello".to_vec(), "Doc", "eng"))
                .await
                .unwrap();
            assert_eq!(worker.run_once().await.unwrap(), 1);

            assert!(queue.pending_entries(10).await.unwrap().is_empty());
            assert_eq!(worker.stats().orphans_acknowledged, 1);
            assert_eq!(processor.calls(), 0);
        }
    }
}
