use super::{
    errors::{EnqueueError, PersistenceError, ValidationError},
    parse::parse_payload,
    rejection::RejectionTracker,
    repository::ValidationRepository,
};
use crate::{
    geocoding::{EnrichmentError, GeocodingEnricher},
    metrics::{MetricsCollector, RejectionMetricsSnapshot},
    queue::{ExtractionJobResult, JobMetadata, JobPayload, JobQueue, MergeJob, QueueRouter, Stage},
    scoring::{ConfidenceScorer, Penalty, RuleEvaluator},
    types::{
        is_blank, CandidateRecord, GeocodingProvenance, ValidationNotes, ValidationStatus,
    },
};
use sha2::{Digest, Sha256};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

/// Pause before the single persistence retry.
const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Processing state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Parsed,
    Enriched,
    Scored,
    Persisted,
    Forwarded,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Parsed => "parsed",
            Self::Enriched => "enriched",
            Self::Scored => "scored",
            Self::Persisted => "persisted",
            Self::Forwarded => "forwarded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a job that reached the merge queue.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub job_id: String,
    pub state: JobState,
    /// `false` when the job bypassed validation.
    pub validated: bool,
    /// Scored record; `None` for bypassed jobs.
    pub record: Option<CandidateRecord>,
    /// Recovered problems, also carried on the merge payload.
    pub errors: Vec<String>,
    pub fingerprint: String,
    /// Rejection counters of this job's locations.
    pub rejection: RejectionMetricsSnapshot,
    /// Queue id of the merge job.
    pub merge_job_id: String,
}

/// Components the processor is built from.
pub struct ValidationDeps {
    /// `None` when enrichment is disabled.
    pub enricher: Option<Arc<GeocodingEnricher>>,
    pub scorer: ConfidenceScorer,
    pub repository: Arc<dyn ValidationRepository>,
    pub queue: Arc<dyn JobQueue>,
    pub router: QueueRouter,
    pub metrics: Arc<MetricsCollector>,
    pub job_timeout: Duration,
}

/// Runs one extraction result through parse, enrich, score, persist and forward.
pub struct ValidationProcessor {
    enricher: Option<Arc<GeocodingEnricher>>,
    evaluator: RuleEvaluator,
    scorer: ConfidenceScorer,
    repository: Arc<dyn ValidationRepository>,
    queue: Arc<dyn JobQueue>,
    router: QueueRouter,
    metrics: Arc<MetricsCollector>,
    job_timeout: Duration,
}

impl ValidationProcessor {
    #[must_use]
    pub fn new(deps: ValidationDeps) -> Self {
        Self {
            enricher: deps.enricher,
            evaluator: RuleEvaluator::new(),
            scorer: deps.scorer,
            repository: deps.repository,
            queue: deps.queue,
            router: deps.router,
            metrics: deps.metrics,
            job_timeout: deps.job_timeout,
        }
    }

    #[must_use]
    pub fn router(&self) -> &QueueRouter {
        &self.router
    }

    /// Processes one extraction result and forwards it to the merge queue.
    ///
    /// Malformed payloads, provider failures and exhausted provider chains are recovered and
    /// reported in [`ValidationResult::errors`] and the location notes. Rejected locations are
    /// forwarded like any other.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::Persistence`] if persisting fails twice
    /// - [`ValidationError::Enqueue`] if the merge queue rejects the job
    /// - [`ValidationError::Timeout`] if the job exceeds its timeout; in-flight provider
    ///   calls are cancelled
    pub async fn process_job_result(
        &self,
        job: ExtractionJobResult,
    ) -> Result<ValidationResult, ValidationError> {
        let start = Instant::now();
        let job_id = job.job_id.clone();

        let result = match tokio::time::timeout(self.job_timeout, self.run(job)).await {
            Ok(result) => result,
            Err(_) => Err(ValidationError::Timeout { job_id: job_id.clone(), timeout: self.job_timeout }),
        };

        let elapsed = start.elapsed();
        self.metrics.record_job(result.is_ok(), elapsed).await;
        match &result {
            Ok(outcome) => info!(
                job_id = %job_id,
                validated = outcome.validated,
                locations = outcome.rejection.total,
                rejected = outcome.rejection.rejected,
                errors = outcome.errors.len(),
                duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "validation job forwarded to merge"
            ),
            Err(e) => {
                transition(&job_id, JobState::Failed);
                warn!(job_id = %job_id, error = %e, kind = e.kind(), "validation job failed");
            }
        }

        result
    }

    async fn run(&self, job: ExtractionJobResult) -> Result<ValidationResult, ValidationError> {
        transition(&job.job_id, JobState::Received);
        let fingerprint = fingerprint(&job);

        if !self.router.should_validate(&job) {
            return self.pass_through(job, fingerprint).await;
        }

        let mut errors = Vec::new();
        let record = match parse_payload(&job.payload) {
            Ok(record) => record,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "unparseable extraction payload, continuing with empty record");
                errors.push(format!("parse_error: {e}"));
                CandidateRecord::default()
            }
        };
        transition(&job.job_id, JobState::Parsed);

        let (mut record, provenance) = self.enrich(&job.job_id, record, &mut errors).await;
        transition(&job.job_id, JobState::Enriched);

        let rejection = self.score(&mut record, &provenance);
        if rejection.total > 0 {
            self.metrics.record_rejection_batch(&rejection).await;
        }
        transition(&job.job_id, JobState::Scored);

        self.persist(&job.job_id, &record).await?;
        transition(&job.job_id, JobState::Persisted);

        let metadata = JobMetadata { fingerprint: Some(fingerprint.clone()), ..job.metadata };
        let merge_queue = self.router.queue_for(Stage::Merge).to_string();
        let enqueue_error = |source| EnqueueError {
            job_id: job.job_id.clone(),
            queue: merge_queue.clone(),
            source,
        };
        let merge = MergeJob::validated(&job.job_id, &record, errors.clone(), metadata)
            .map_err(enqueue_error)?;
        let merge_job_id =
            self.queue.enqueue(&merge_queue, JobPayload::Merge(merge)).await.map_err(enqueue_error)?;
        transition(&job.job_id, JobState::Forwarded);

        Ok(ValidationResult {
            job_id: job.job_id,
            state: JobState::Forwarded,
            validated: true,
            record: Some(record),
            errors,
            fingerprint,
            rejection,
            merge_job_id,
        })
    }

    async fn pass_through(
        &self,
        job: ExtractionJobResult,
        fingerprint: String,
    ) -> Result<ValidationResult, ValidationError> {
        debug!(job_id = %job.job_id, "validation skipped, forwarding untouched");
        let job_id = job.job_id.clone();
        let merge_queue = self.router.queue_for(Stage::Merge).to_string();

        let mut merge = MergeJob::passthrough(job);
        merge.metadata.fingerprint = Some(fingerprint.clone());
        let merge_job_id = self
            .queue
            .enqueue(&merge_queue, JobPayload::Merge(merge))
            .await
            .map_err(|source| EnqueueError { job_id: job_id.clone(), queue: merge_queue, source })?;
        transition(&job_id, JobState::Forwarded);

        Ok(ValidationResult {
            job_id,
            state: JobState::Forwarded,
            validated: false,
            record: None,
            errors: Vec::new(),
            fingerprint,
            rejection: RejectionMetricsSnapshot::default(),
            merge_job_id,
        })
    }

    async fn enrich(
        &self,
        job_id: &str,
        record: CandidateRecord,
        errors: &mut Vec<String>,
    ) -> (CandidateRecord, Vec<Vec<GeocodingProvenance>>) {
        let Some(enricher) = self.enricher.as_ref().filter(|_| !record.locations.is_empty()) else {
            return (record, Vec::new());
        };

        let mut outcome = enricher.enrich(record).await;
        for error in outcome.errors {
            match &error {
                EnrichmentError::AllProvidersExhausted { location, action } => {
                    if let Some(target) = outcome.record.locations.get_mut(*location) {
                        push_unique(&mut target.notes_mut().messages, format!("geocoding_exhausted:{action}"));
                    }
                }
                EnrichmentError::Store(e) => {
                    warn!(job_id = %job_id, error = %e, "state store error during enrichment");
                }
            }
            errors.push(error.to_string());
        }

        (outcome.record, outcome.provenance)
    }

    /// Scores locations, then organizations and services from them. Returns the job's
    /// rejection counters.
    fn score(
        &self,
        record: &mut CandidateRecord,
        provenance: &[Vec<GeocodingProvenance>],
    ) -> RejectionMetricsSnapshot {
        let mut tracker = RejectionTracker::new();
        let mut scores = Vec::with_capacity(record.locations.len());

        for (index, location) in record.locations.iter_mut().enumerate() {
            let fresh = provenance.get(index).map_or(&[][..], Vec::as_slice);
            let outcome = self.evaluator.evaluate(location, fresh);
            let scored = self.scorer.score_location(&outcome);

            location.confidence_score = Some(scored.score);
            location.validation_status = Some(scored.status);
            let notes = location.notes_mut();
            merge_provenance(notes, fresh);
            notes.penalties = scored.penalties.iter().map(Penalty::note).collect();
            notes.rejection_reason = scored.rejection_reason.map(|r| r.as_str().to_string());

            tracker.record(scored.rejection_reason);
            scores.push(scored.score);
        }

        if let Some(score) = self.scorer.score_organization(&scores) {
            let status = self.scorer.status(score);
            for organization in &mut record.organizations {
                organization.confidence_score = Some(score);
                organization.validation_status = Some(status);
                let notes = organization.validation_notes.get_or_insert_with(ValidationNotes::default);
                notes.rejection_reason = rejected_reason(status);
            }
        }

        let linked: Vec<(Option<&str>, u8)> = record
            .locations
            .iter()
            .zip(&scores)
            .map(|(location, score)| (location.id.as_deref(), *score))
            .collect();
        for service in &mut record.services {
            let linked_score = service.location_id.as_deref().and_then(|wanted| {
                linked.iter().find(|(id, _)| *id == Some(wanted)).map(|(_, score)| *score)
            });
            let Some(score) = self.scorer.score_service(service, linked_score, &scores) else {
                continue;
            };

            let status = self.scorer.status(score);
            let mut penalties = Vec::new();
            if is_blank(service.name.as_deref()) {
                penalties.push("missing_name:-5".to_string());
            }
            if is_blank(service.description.as_deref()) {
                penalties.push("missing_description:-5".to_string());
            }

            service.confidence_score = Some(score);
            service.validation_status = Some(status);
            let notes = service.validation_notes.get_or_insert_with(ValidationNotes::default);
            notes.penalties = penalties;
            notes.rejection_reason = rejected_reason(status);
        }

        tracker.snapshot()
    }

    /// Persists with one retry.
    async fn persist(&self, job_id: &str, record: &CandidateRecord) -> Result<(), PersistenceError> {
        match self.repository.persist(job_id, record).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(job_id = %job_id, error = %first, "persisting validation fields failed, retrying once");
                tokio::time::sleep(PERSIST_RETRY_DELAY).await;
                self.repository.persist(job_id, record).await
            }
        }
    }
}

fn transition(job_id: &str, state: JobState) {
    debug!(job_id = %job_id, state = %state, "job state transition");
}

fn rejected_reason(status: ValidationStatus) -> Option<String> {
    (status == ValidationStatus::Rejected).then(|| "low_score".to_string())
}

fn push_unique(messages: &mut Vec<String>, message: String) {
    if !messages.contains(&message) {
        messages.push(message);
    }
}

/// Appends resolved entries; an unresolved entry replaces earlier unresolved entries for the
/// same lookup so repeated runs do not accumulate them.
fn merge_provenance(notes: &mut ValidationNotes, fresh: &[GeocodingProvenance]) {
    for entry in fresh {
        if !entry.is_resolved() {
            notes.provenance.retain(|p| p.is_resolved() || p.action != entry.action);
        }
        notes.provenance.push(entry.clone());
    }
}

/// Content fingerprint from metadata, else SHA-256 of the payload's canonical JSON.
#[must_use]
pub fn fingerprint(job: &ExtractionJobResult) -> String {
    if let Some(existing) = job.metadata.fingerprint.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
        return existing.to_string();
    }

    // serde_json maps are ordered, so serialization is canonical.
    let canonical = serde_json::to_string(&job.payload).unwrap_or_default();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}
