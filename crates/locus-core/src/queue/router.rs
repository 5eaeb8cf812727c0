use super::{ExtractionJobResult, JobPayload, JobQueue, MergeJob, QueueError};
use crate::{config::AppConfig, validation::parse::payload_object};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level keys that identify an HSDS-shaped payload.
const HSDS_KEYS: &[&str] = &["organization", "service", "location"];

/// Pipeline stage a job is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Validation,
    Merge,
}

impl Stage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Validation => "validation",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides which queue extraction output goes to.
#[derive(Debug, Clone)]
pub struct QueueRouter {
    validation_enabled: bool,
    only_validate_schema: bool,
    schema_family: String,
    extraction_queue: String,
    validator_queue: String,
    merge_queue: String,
}

impl QueueRouter {
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        Self {
            validation_enabled: config.validator.enabled,
            only_validate_schema: config.validator.only_validate_schema,
            schema_family: config.validator.schema_family.clone(),
            extraction_queue: config.queue.extraction_queue_name.clone(),
            validator_queue: config.validator.queue_name.clone(),
            merge_queue: config.queue.merge_queue_name.clone(),
        }
    }

    #[must_use]
    pub fn validation_enabled(&self) -> bool {
        self.validation_enabled
    }

    /// Stage that follows `current`; `None` after merge.
    #[must_use]
    pub fn next_stage(&self, current: Stage) -> Option<Stage> {
        match current {
            Stage::Extraction if self.validation_enabled => Some(Stage::Validation),
            Stage::Extraction | Stage::Validation => Some(Stage::Merge),
            Stage::Merge => None,
        }
    }

    /// Queue name for a stage.
    #[must_use]
    pub fn queue_for(&self, stage: Stage) -> &str {
        match stage {
            Stage::Extraction => &self.extraction_queue,
            Stage::Validation => &self.validator_queue,
            Stage::Merge => &self.merge_queue,
        }
    }

    /// Returns `true` if `job` should pass through validation.
    ///
    /// With `only_validate_schema` set, jobs whose schema is not the configured family bypass
    /// validation even when it is enabled.
    #[must_use]
    pub fn should_validate(&self, job: &ExtractionJobResult) -> bool {
        if !self.validation_enabled {
            return false;
        }
        if !self.only_validate_schema {
            return true;
        }

        detect_schema(job).is_some_and(|schema| schema.eq_ignore_ascii_case(&self.schema_family))
    }

    /// Enqueues extraction output on the validator queue, or forwards it untouched to the
    /// merge queue. Returns the stage the job was routed to.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the enqueue fails.
    pub async fn dispatch_extraction_result(
        &self,
        queue: &dyn JobQueue,
        job: ExtractionJobResult,
    ) -> Result<Stage, QueueError> {
        let stage = if self.should_validate(&job) { Stage::Validation } else { Stage::Merge };
        let job_id = job.job_id.clone();

        let payload = match stage {
            Stage::Validation => JobPayload::Extraction(job),
            _ => JobPayload::Merge(MergeJob::passthrough(job)),
        };
        queue.enqueue(self.queue_for(stage), payload).await?;

        tracing::debug!(job_id = %job_id, stage = %stage, "routed extraction result");
        Ok(stage)
    }
}

/// Schema family from metadata, or inferred from the payload's top-level keys.
fn detect_schema(job: &ExtractionJobResult) -> Option<String> {
    if let Some(schema) = job.metadata.schema.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        return Some(schema.to_string());
    }

    let object = payload_object(&job.payload).ok()?;
    HSDS_KEYS.iter().any(|key| object.contains_key(*key)).then(|| "hsds".to_string())
}
