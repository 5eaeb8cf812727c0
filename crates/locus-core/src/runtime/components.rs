//! Core component container for the Locus runtime.

use crate::{
    geocoding::GeocodingEnricher, metrics::MetricsCollector, queue::JobQueue,
    store::StateStore, validation::{ValidationProcessor, ValidationRepository},
};
use std::sync::Arc;

/// Container for all initialized Locus core components.
///
/// All components are wrapped in `Arc` and shared between worker tasks.
#[derive(Clone)]
pub struct LocusComponents {
    metrics_collector: Arc<MetricsCollector>,
    state_store: Arc<dyn StateStore>,
    job_queue: Arc<dyn JobQueue>,
    repository: Arc<dyn ValidationRepository>,
    enricher: Option<Arc<GeocodingEnricher>>,
    processor: Arc<ValidationProcessor>,
}

impl LocusComponents {
    /// Creates a new components container.
    ///
    /// Called by `LocusRuntimeBuilder` during initialization.
    #[must_use]
    pub fn new(
        metrics_collector: Arc<MetricsCollector>,
        state_store: Arc<dyn StateStore>,
        job_queue: Arc<dyn JobQueue>,
        repository: Arc<dyn ValidationRepository>,
        enricher: Option<Arc<GeocodingEnricher>>,
        processor: Arc<ValidationProcessor>,
    ) -> Self {
        Self { metrics_collector, state_store, job_queue, repository, enricher, processor }
    }

    #[must_use]
    pub fn metrics_collector(&self) -> &Arc<MetricsCollector> {
        &self.metrics_collector
    }

    /// Store backing circuit breakers and the geocode cache.
    #[must_use]
    pub fn state_store(&self) -> &Arc<dyn StateStore> {
        &self.state_store
    }

    #[must_use]
    pub fn job_queue(&self) -> &Arc<dyn JobQueue> {
        &self.job_queue
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<dyn ValidationRepository> {
        &self.repository
    }

    /// Returns the enricher, or `None` if enrichment is disabled.
    #[must_use]
    pub fn enricher(&self) -> Option<&Arc<GeocodingEnricher>> {
        self.enricher.as_ref()
    }

    #[must_use]
    pub fn processor(&self) -> &Arc<ValidationProcessor> {
        &self.processor
    }
}
