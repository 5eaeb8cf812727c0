use super::{FailedJob, JobPayload, JobQueue, QueueError, QueuedJob};
use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct QueueState {
    pending: HashMap<String, VecDeque<QueuedJob>>,
    running: HashMap<String, QueuedJob>,
    completed: HashSet<String>,
    failed: Vec<FailedJob>,
}

/// Process-local [`JobQueue`] for tests and single-process runs.
#[derive(Default)]
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    reject_enqueue: AtomicBool,
}

impl InMemoryJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `enqueue` fail until switched off again.
    pub fn set_reject_enqueue(&self, reject: bool) {
        self.reject_enqueue.store(reject, Ordering::SeqCst);
    }

    /// Pending payloads of `queue` in delivery order, without claiming them.
    pub async fn peek(&self, queue: &str) -> Vec<JobPayload> {
        let state = self.state.lock().await;
        state
            .pending
            .get(queue)
            .map(|jobs| jobs.iter().map(|j| j.payload.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn completed_count(&self) -> usize {
        self.state.lock().await.completed.len()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, queue: &str, payload: JobPayload) -> Result<String, QueueError> {
        if self.reject_enqueue.load(Ordering::SeqCst) {
            return Err(QueueError::Rejected {
                queue: queue.to_string(),
                reason: "enqueue disabled".to_string(),
            });
        }

        let id = Uuid::new_v4().to_string();
        let job = QueuedJob { id: id.clone(), queue: queue.to_string(), payload, attempts: 0 };
        self.state.lock().await.pending.entry(queue.to_string()).or_default().push_back(job);
        Ok(id)
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<QueuedJob>, QueueError> {
        let mut state = self.state.lock().await;
        let Some(mut job) = state.pending.get_mut(queue).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        job.attempts += 1;
        state.running.insert(job.id.clone(), job.clone());
        Ok(Some(job))
    }

    async fn complete(&self, id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.running.remove(id).ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        state.completed.insert(id.to_string());
        Ok(())
    }

    async fn fail(&self, id: &str, error: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let job = state.running.remove(id).ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        state.failed.push(FailedJob {
            id: job.id,
            queue: job.queue,
            payload: job.payload,
            error: error.to_string(),
            attempts: job.attempts,
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn len(&self, queue: &str) -> Result<usize, QueueError> {
        Ok(self.state.lock().await.pending.get(queue).map_or(0, VecDeque::len))
    }

    async fn failed(&self, queue: &str) -> Result<Vec<FailedJob>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.failed.iter().filter(|j| j.queue == queue).cloned().collect())
    }
}
