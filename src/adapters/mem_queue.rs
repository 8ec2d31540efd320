//! In-process [`JobQueue`] reference adapter built on `async_channel`,
//! matching the teacher's task/channel worker pattern (`read_task`,
//! `stream_writer`): one bounded channel per queue, a fixed pool of
//! `tokio::spawn`ed workers pulling from it, explicit backoff-then-retry
//! on handler failure.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::ports::job_queue::{Job, JobHandler, JobOptions, JobPayload, JobQueue, JobStatus, QueueName};

type StatusMap = Arc<Mutex<HashMap<String, JobStatus>>>;

struct Delivery {
    job: Job,
    opts: JobOptions,
    attempt: u32,
}

#[derive(Default)]
pub struct InMemoryQueue {
    channels: Mutex<HashMap<&'static str, (Sender<Delivery>, Receiver<Delivery>)>>,
    statuses: StatusMap,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel_for(&self, queue: QueueName) -> (Sender<Delivery>, Receiver<Delivery>) {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(queue.as_str())
            .or_insert_with(|| async_channel::unbounded())
            .clone()
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn add_job(&self, queue: QueueName, payload: JobPayload, opts: JobOptions) -> Result<Job> {
        let id = opts.job_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let job = Job { id: id.clone(), queue, payload };
        self.statuses.lock().unwrap().insert(id, JobStatus::Waiting);

        let (sender, _) = self.channel_for(queue);
        let delivery = Delivery { job: job.clone(), opts, attempt: 0 };
        if delivery.opts.delay > std::time::Duration::ZERO {
            let delay = delivery.opts.delay;
            let sender = sender.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = sender.send(delivery).await;
            });
        } else {
            let _ = sender.send(delivery).await;
        }
        Ok(job)
    }

    async fn process_jobs(
        &self,
        queue: QueueName,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
    ) -> Result<()> {
        let (sender, receiver) = self.channel_for(queue);

        for _ in 0..concurrency {
            let receiver = receiver.clone();
            let sender = sender.clone();
            let handler = handler.clone();
            let statuses = self.statuses.clone();
            tokio::spawn(async move {
                while let Ok(delivery) = receiver.recv().await {
                    let job_id = delivery.job.id.clone();
                    statuses.lock().unwrap().insert(job_id.clone(), JobStatus::Active);
                    let result = handler.handle(delivery.job.clone()).await;
                    match result {
                        Ok(()) => {
                            debug!(job_id = %job_id, "job completed");
                            statuses.lock().unwrap().insert(job_id, JobStatus::Completed);
                        }
                        Err(e) if e.is_retryable() && delivery.attempt + 1 < delivery.opts.attempts => {
                            let next_attempt = delivery.attempt + 1;
                            let delay = delivery.opts.backoff.delay_for_attempt(next_attempt);
                            warn!(job_id = %job_id, attempt = next_attempt, ?delay, "job failed, retrying");
                            statuses.lock().unwrap().insert(job_id, JobStatus::Waiting);
                            let redelivery = Delivery { job: delivery.job, opts: delivery.opts, attempt: next_attempt };
                            let sender = sender.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = sender.send(redelivery).await;
                            });
                        }
                        Err(e) => {
                            warn!(job_id = %job_id, error = %e, "job failed permanently");
                            statuses.lock().unwrap().insert(job_id, JobStatus::Failed);
                        }
                    }
                }
            });
        }
        Ok(())
    }

    async fn job_status(&self, job_id: &str) -> Result<Option<JobStatus>> {
        Ok(self.statuses.lock().unwrap().get(job_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileId, SyncAction};
    use crate::ports::job_queue::NasSyncJob;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _job: Job) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivered_job_reaches_handler() {
        let queue = InMemoryQueue::new();
        let count = Arc::new(AtomicUsize::new(0));
        queue.process_jobs(QueueName::NasFileSync, Arc::new(CountingHandler(count.clone())), 2).await.unwrap();

        let payload = JobPayload::NasSync(NasSyncJob {
            file_id: "f1".to_string() as FileId,
            action: SyncAction::Upload,
            sync_event_id: "e1".into(),
            multipart_session_id: None,
        });
        queue.add_job(QueueName::NasFileSync, payload, JobOptions::default()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
