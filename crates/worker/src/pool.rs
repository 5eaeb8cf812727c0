use locus_core::{
    metrics::MetricsCollector,
    queue::{JobPayload, JobQueue, QueueError},
    runtime::LocusRuntime,
    validation::ValidationProcessor,
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::broadcast::{self, error::TryRecvError},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// Result of one poll of the validation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The queue was empty.
    Idle,
    /// A job was validated and forwarded.
    Completed,
    /// A job ended on the failure list.
    Failed,
}

/// Independent workers pulling extraction results from the validation queue.
pub struct WorkerPool {
    processor: Arc<ValidationProcessor>,
    queue: Arc<dyn JobQueue>,
    metrics: Arc<MetricsCollector>,
    queue_name: String,
    poll_interval: Duration,
    /// Jobs a worker takes back to back before yielding.
    batch_size: usize,
    workers: usize,
}

impl WorkerPool {
    #[must_use]
    pub fn new(runtime: &LocusRuntime, workers: usize) -> Self {
        let config = runtime.config();
        Self {
            processor: runtime.processor().clone(),
            queue: runtime.components().job_queue().clone(),
            metrics: runtime.metrics_collector().clone(),
            queue_name: config.validator.queue_name.clone(),
            poll_interval: config.poll_interval(),
            batch_size: config.validator.batch_size.max(1),
            workers: workers.max(1),
        }
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Claims and processes at most one job.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the queue cannot be read or the job cannot be marked finished.
    pub async fn poll_once(&self, worker_id: usize) -> Result<PollOutcome, QueueError> {
        let pending = self.queue.len(&self.queue_name).await?;
        self.metrics.record_queue_size(&self.queue_name, pending);

        let Some(queued) = self.queue.dequeue(&self.queue_name).await? else {
            return Ok(PollOutcome::Idle);
        };

        let job = match queued.payload {
            JobPayload::Extraction(job) => job,
            JobPayload::Merge(merge) => {
                warn!(
                    worker_id,
                    job_id = %merge.job_id,
                    queue = %self.queue_name,
                    "merge payload on validation queue"
                );
                self.queue.fail(&queued.id, "unexpected merge payload on validation queue").await?;
                return Ok(PollOutcome::Failed);
            }
        };

        debug!(worker_id, job_id = %job.job_id, attempts = queued.attempts, "claimed job");

        match self.processor.process_job_result(job).await {
            Ok(_) => {
                self.queue.complete(&queued.id).await?;
                Ok(PollOutcome::Completed)
            }
            Err(e) => {
                self.queue.fail(&queued.id, &e.to_string()).await?;
                Ok(PollOutcome::Failed)
            }
        }
    }

    /// Processes up to `batch_size` jobs. Returns `true` if the queue ran dry.
    async fn drain_batch(&self, worker_id: usize) -> bool {
        for _ in 0..self.batch_size {
            match self.poll_once(worker_id).await {
                Ok(PollOutcome::Idle) => return true,
                Ok(_) => {}
                Err(e) => {
                    error!(worker_id, error = %e, "queue operation failed");
                    return true;
                }
            }
        }
        false
    }

    async fn run_worker(&self, worker_id: usize, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!(worker_id, queue = %self.queue_name, "worker started");

        loop {
            // In-flight jobs always finish; shutdown is only observed between batches.
            match shutdown_rx.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => break,
            }

            if self.drain_batch(worker_id).await {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    () = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        debug!(worker_id, "worker stopped");
    }

    /// Starts one task per worker. Each stops after the shutdown signal once its current
    /// job is finished.
    #[must_use]
    pub fn spawn(self: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        info!(workers = self.workers, queue = %self.queue_name, "starting worker pool");

        (0..self.workers)
            .map(|worker_id| {
                let pool = self.clone();
                let shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(async move { pool.run_worker(worker_id, shutdown_rx).await })
            })
            .collect()
    }
}
