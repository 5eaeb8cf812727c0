//! Job payloads, queue backends and stage routing.
//!
//! The pipeline moves jobs through named queues: extraction output lands on the validator
//! queue (or straight on the merge queue when validation is skipped), and the validator
//! forwards every processed record to the merge queue.

pub mod memory;
pub mod router;
pub mod sqlite;

pub use memory::InMemoryJobQueue;
pub use router::{QueueRouter, Stage};
pub use sqlite::SqliteJobQueue;

use crate::types::CandidateRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Job payload serialization failed: {0}")]
    Serialization(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Queue rejected job for {queue}: {reason}")]
    Rejected { queue: String, reason: String },
}

impl QueueError {
    /// Returns `true` if retrying the operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Rejected { .. })
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Metadata carried with a job from extraction through merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    /// Content fingerprint used for idempotent reprocessing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "scraper")]
    pub scraper_id: Option<String>,
    /// Schema family of the payload, e.g. `"hsds"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Output of the extraction stage, consumed by the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionJobResult {
    pub job_id: String,
    /// Either the parsed structure or the raw model output text.
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub metadata: JobMetadata,
}

impl ExtractionJobResult {
    #[must_use]
    pub fn new(job_id: impl Into<String>, payload: Value) -> Self {
        Self { job_id: job_id.into(), payload, metadata: JobMetadata::default() }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Job handed to the merge stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeJob {
    pub job_id: String,
    /// Scored record, or the untouched extraction payload when validation was skipped.
    pub data: Value,
    #[serde(default)]
    pub validation_errors: Vec<String>,
    #[serde(default)]
    pub metadata: JobMetadata,
    /// `false` when the record bypassed validation.
    #[serde(default)]
    pub validated: bool,
}

impl MergeJob {
    /// Builds a merge job carrying a validated record.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Serialization`] if the record cannot be serialized.
    pub fn validated(
        job_id: impl Into<String>,
        record: &CandidateRecord,
        validation_errors: Vec<String>,
        metadata: JobMetadata,
    ) -> Result<Self, QueueError> {
        Ok(Self {
            job_id: job_id.into(),
            data: serde_json::to_value(record)?,
            validation_errors,
            metadata,
            validated: true,
        })
    }

    /// Forwards an extraction result without validation.
    #[must_use]
    pub fn passthrough(job: ExtractionJobResult) -> Self {
        Self {
            job_id: job.job_id,
            data: job.payload,
            validation_errors: Vec::new(),
            metadata: job.metadata,
            validated: false,
        }
    }
}

/// Payload stored on a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Extraction(ExtractionJobResult),
    Merge(MergeJob),
}

impl JobPayload {
    #[must_use]
    pub fn job_id(&self) -> &str {
        match self {
            Self::Extraction(job) => &job.job_id,
            Self::Merge(job) => &job.job_id,
        }
    }
}

/// A job claimed by a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    /// Queue-assigned identifier, distinct from the record's `job_id`.
    pub id: String,
    pub queue: String,
    pub payload: JobPayload,
    /// Number of times this job has been claimed, including this one.
    pub attempts: u32,
}

/// Entry of a queue's failure list.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedJob {
    pub id: String,
    pub queue: String,
    pub payload: JobPayload,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// Durable job queue shared by all workers.
///
/// Each job is claimed by exactly one worker; a claimed job ends either in
/// [`complete`](Self::complete) or in [`fail`](Self::fail), which keeps it on the failure
/// list with the captured error text.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Appends a job and returns its queue id.
    async fn enqueue(&self, queue: &str, payload: JobPayload) -> Result<String, QueueError>;

    /// Claims the oldest pending job, if any.
    async fn dequeue(&self, queue: &str) -> Result<Option<QueuedJob>, QueueError>;

    async fn complete(&self, id: &str) -> Result<(), QueueError>;

    async fn fail(&self, id: &str, error: &str) -> Result<(), QueueError>;

    /// Number of pending jobs.
    async fn len(&self, queue: &str) -> Result<usize, QueueError>;

    async fn failed(&self, queue: &str) -> Result<Vec<FailedJob>, QueueError>;
}
