use crate::queue::QueueError;
use std::time::Duration;
use thiserror::Error;

/// Extraction payload could not be turned into a record. Recovered: the job continues with
/// an empty record and the error is reported on the merge payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Payload is empty")]
    Empty,

    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Payload must be a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("Payload does not match the record schema: {0}")]
    Schema(String),
}

/// Writing validation fields failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Repository backend error: {0}")]
    Backend(String),

    #[error("Failed to serialize validation notes: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// The validated record could not be handed to the merge stage.
#[derive(Debug, Error)]
#[error("Failed to enqueue job {job_id} on {queue}: {source}")]
pub struct EnqueueError {
    pub job_id: String,
    pub queue: String,
    #[source]
    pub source: QueueError,
}

/// Failure that marks the whole job failed so the queue can redeliver it.
///
/// Parse, provider and enrichment failures never surface here; they degrade to notes on the
/// forwarded record.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Persistence failed after retry: {0}")]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Enqueue(#[from] EnqueueError),

    #[error("Job {job_id} exceeded timeout of {timeout:?}")]
    Timeout { job_id: String, timeout: Duration },
}

impl ValidationError {
    /// Returns `true` if redelivering the job may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Persistence(PersistenceError::Backend(_)) | Self::Timeout { .. } => true,
            Self::Persistence(PersistenceError::Serialization(_)) => false,
            Self::Enqueue(e) => e.source.is_transient(),
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Persistence(_) => "persistence",
            Self::Enqueue(_) => "enqueue",
            Self::Timeout { .. } => "timeout",
        }
    }
}
