//! Job queue port (C3): named queues with delayed/retry/backoff
//! semantics, per-queue concurrency, and status introspection.
//! See spec.md §6 "Job queue port".

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::model::{FileId, SyncAction};

/// The two named queues the sync pipeline and cache-restore reconciler
/// use (spec.md §4.5/§4.6).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QueueName {
    NasFileSync,
    CacheRestore,
}

impl QueueName {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::NasFileSync => "NAS_FILE_SYNC",
            QueueName::CacheRestore => "CACHE_RESTORE",
        }
    }
}

/// Payload for a `NAS_FILE_SYNC` job.
#[derive(Debug, Clone)]
pub struct NasSyncJob {
    pub file_id: FileId,
    pub action: SyncAction,
    pub sync_event_id: String,
    pub multipart_session_id: Option<String>,
}

/// Payload for a `CACHE_RESTORE` job.
#[derive(Debug, Clone)]
pub struct CacheRestoreJob {
    pub file_id: FileId,
}

/// A job's payload, tagged by the queue it belongs to.
#[derive(Debug, Clone)]
pub enum JobPayload {
    NasSync(NasSyncJob),
    CacheRestore(CacheRestoreJob),
}

/// Enqueue-time options, mirroring spec.md §6's
/// `addJob(name, data, {jobId, delay, attempts, backoff, priority})`.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Deduplication key. Re-enqueuing the same `job_id` while an
    /// existing job with that id is pending/active is coalesced.
    pub job_id: Option<String>,
    pub delay: Duration,
    pub attempts: u32,
    pub backoff: BackoffPolicy,
    pub priority: i32,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self { job_id: None, delay: Duration::ZERO, attempts: 1, backoff: BackoffPolicy::default(), priority: 0 }
    }
}

/// Exponential backoff with a cap, used for queue redelivery.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base: Duration::from_secs(1), max: Duration::from_secs(60) }
    }
}

impl BackoffPolicy {
    /// Delay before the `attempt`-th (1-indexed) redelivery.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let millis = self.base.as_millis().saturating_mul(1u128 << attempt.min(20));
        Duration::from_millis(millis.min(self.max.as_millis()) as u64)
    }
}

/// Current state of an enqueued job.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

/// Handle returned by [`JobQueue::add_job`].
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub queue: QueueName,
    pub payload: JobPayload,
}

/// A handler invoked once per delivered job. Returning `Err` with a
/// retryable [`crate::error::StorageError`] schedules a backoff redelivery
/// (up to `attempts`); a non-retryable error or exhausted attempts moves
/// the job to the dead-letter state.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> Result<()>;
}

/// Named queues with delayed/retry/backoff semantics and per-queue
/// concurrency, per spec.md §6.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn add_job(&self, queue: QueueName, payload: JobPayload, opts: JobOptions) -> Result<Job>;

    /// Registers `handler` to process `queue` with at most `concurrency`
    /// jobs in flight at once. Returns immediately; processing happens on
    /// background tasks owned by the adapter.
    async fn process_jobs(
        &self,
        queue: QueueName,
        handler: std::sync::Arc<dyn JobHandler>,
        concurrency: usize,
    ) -> Result<()>;

    async fn job_status(&self, job_id: &str) -> Result<Option<JobStatus>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let b = BackoffPolicy { base: Duration::from_millis(100), max: Duration::from_secs(10) };
        assert_eq!(b.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(b.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(b.delay_for_attempt(10), Duration::from_secs(10));
    }
}
