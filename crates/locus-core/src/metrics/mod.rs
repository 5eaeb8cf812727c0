//! # Metrics Architecture
//!
//! Two paths, as in every service of this pipeline:
//!
//! ## Prometheus (global recorder)
//!
//! Counters, gauges and histograms recorded through the `metrics` facade on every event.
//! The recorder is installed once per process; [`MetricsCollector::render`] returns the
//! exposition text.
//!
//! ## Internal statistics
//!
//! [`ValidatorStats`] mirrors the counters in memory so that the worker can log summaries and
//! tests can assert on exact values without scraping. Every recorder takes the write lock, so
//! the mirror never drops an increment under contention.
//!
//! ## Metric Names
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `validator_jobs_total` | counter | |
//! | `validator_jobs_passed` | counter | |
//! | `validator_jobs_failed` | counter | |
//! | `validator_processing_time_seconds` | histogram | |
//! | `validator_queue_size` | gauge | `queue` |
//! | `locations_rejected_total` | counter | |
//! | `locations_rejected_by_reason_total` | counter | `reason` |
//! | `validator_rejection_rate` | gauge | |
//! | `geocoding_cache_hits_total` | counter | `lookup` |
//! | `geocoding_cache_misses_total` | counter | `lookup` |
//! | `geocoding_provider_success_total` | counter | `provider` |
//! | `geocoding_provider_failure_total` | counter | `provider`, `error_type` |
//! | `circuit_breaker_opened_total` | counter | `provider` |

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::sync::RwLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn try_init_prometheus_recorder(
) -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().install_recorder()
}

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match try_init_prometheus_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "failed to install prometheus recorder, using detached fallback"
                );
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Rejection counters and the resulting rate.
///
/// Produced per batch by the rejection tracker, and cumulatively by
/// [`MetricsCollector::rejection_snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RejectionMetricsSnapshot {
    /// Locations scored.
    pub total: u64,
    /// Locations rejected.
    pub rejected: u64,
    /// Rejected locations keyed by rejection reason.
    pub rejected_by_reason: BTreeMap<String, u64>,
    /// `rejected / total` as a percentage in `0.0..=100.0`.
    pub rejection_rate: f64,
}

impl RejectionMetricsSnapshot {
    /// Percentage of rejected locations; `0.0` for an empty batch.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rate_of(rejected: u64, total: u64) -> f64 {
        if total == 0 {
            0.0
        } else {
            rejected as f64 / total as f64 * 100.0
        }
    }
}

/// In-memory mirror of the Prometheus counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorStats {
    pub jobs_total: u64,
    pub jobs_passed: u64,
    pub jobs_failed: u64,
    pub locations_total: u64,
    pub locations_rejected: u64,
    pub rejected_by_reason: BTreeMap<String, u64>,
    /// Rate of the most recent batch, matching the `validator_rejection_rate` gauge.
    pub last_rejection_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub provider_success: HashMap<String, u64>,
    pub provider_failure: HashMap<String, u64>,
    pub circuit_breaker_opened: HashMap<String, u64>,
}

pub struct MetricsCollector {
    stats: Arc<RwLock<ValidatorStats>>,
    prometheus_handle: PrometheusHandle,
}

impl MetricsCollector {
    /// Creates a collector backed by the process-wide Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if the Prometheus recorder cannot be initialized.
    pub fn new() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let prometheus_handle = init_prometheus_recorder();

        Ok(Self { stats: Arc::new(RwLock::new(ValidatorStats::default())), prometheus_handle })
    }

    /// Creates a collector that keeps internal statistics only.
    ///
    /// Used when `metrics.enabled` is false: no global recorder is installed, so the facade
    /// macros are no-ops and [`render`](Self::render) returns an empty exposition.
    #[must_use]
    pub fn without_exporter() -> Self {
        let prometheus_handle = PrometheusBuilder::new().build_recorder().handle();
        Self { stats: Arc::new(RwLock::new(ValidatorStats::default())), prometheus_handle }
    }

    // Job Metrics

    /// Record a finished validation job.
    pub async fn record_job(&self, success: bool, duration: Duration) {
        counter!("validator_jobs_total").increment(1);
        if success {
            counter!("validator_jobs_passed").increment(1);
        } else {
            counter!("validator_jobs_failed").increment(1);
        }
        histogram!("validator_processing_time_seconds").record(duration.as_secs_f64());

        let mut stats = self.stats.write().await;
        stats.jobs_total += 1;
        if success {
            stats.jobs_passed += 1;
        } else {
            stats.jobs_failed += 1;
        }
    }

    /// Record the current depth of a queue.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_queue_size(&self, queue: &str, size: usize) {
        gauge!("validator_queue_size", "queue" => queue.to_string()).set(size as f64);
    }

    // Rejection Metrics

    /// Record the rejection outcome of one batch.
    ///
    /// Counters accumulate; the rate gauge is set to the batch's own rate.
    pub async fn record_rejection_batch(&self, batch: &RejectionMetricsSnapshot) {
        counter!("locations_rejected_total").increment(batch.rejected);
        for (reason, count) in &batch.rejected_by_reason {
            counter!("locations_rejected_by_reason_total", "reason" => reason.clone())
                .increment(*count);
        }
        gauge!("validator_rejection_rate").set(batch.rejection_rate);

        let mut stats = self.stats.write().await;
        stats.locations_total += batch.total;
        stats.locations_rejected += batch.rejected;
        for (reason, count) in &batch.rejected_by_reason {
            *stats.rejected_by_reason.entry(reason.clone()).or_insert(0) += count;
        }
        stats.last_rejection_rate = batch.rejection_rate;
    }

    /// Cumulative rejection counters with the rate of the most recent batch.
    pub async fn rejection_snapshot(&self) -> RejectionMetricsSnapshot {
        let stats = self.stats.read().await;
        RejectionMetricsSnapshot {
            total: stats.locations_total,
            rejected: stats.locations_rejected,
            rejected_by_reason: stats.rejected_by_reason.clone(),
            rejection_rate: stats.last_rejection_rate,
        }
    }

    // Geocoding Metrics

    pub async fn record_cache_hit(&self, lookup: &'static str) {
        counter!("geocoding_cache_hits_total", "lookup" => lookup).increment(1);
        let mut stats = self.stats.write().await;
        stats.cache_hits += 1;
    }

    pub async fn record_cache_miss(&self, lookup: &'static str) {
        counter!("geocoding_cache_misses_total", "lookup" => lookup).increment(1);
        let mut stats = self.stats.write().await;
        stats.cache_misses += 1;
    }

    pub async fn record_provider_success(&self, provider: &str) {
        counter!("geocoding_provider_success_total", "provider" => provider.to_string())
            .increment(1);
        let mut stats = self.stats.write().await;
        *stats.provider_success.entry(provider.to_string()).or_insert(0) += 1;
    }

    pub async fn record_provider_failure(&self, provider: &str, error_type: &'static str) {
        counter!(
            "geocoding_provider_failure_total",
            "provider" => provider.to_string(),
            "error_type" => error_type
        )
        .increment(1);
        let mut stats = self.stats.write().await;
        *stats.provider_failure.entry(provider.to_string()).or_insert(0) += 1;
    }

    // Circuit Breaker Metrics

    /// Record a breaker transition to open. Only the worker that performed the transition
    /// records it.
    pub async fn record_circuit_opened(&self, provider: &str) {
        counter!("circuit_breaker_opened_total", "provider" => provider.to_string()).increment(1);
        let mut stats = self.stats.write().await;
        *stats.circuit_breaker_opened.entry(provider.to_string()).or_insert(0) += 1;
    }

    /// Get current metrics as Prometheus exposition text.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }

    /// Get internal statistics.
    pub async fn get_internal_metrics(&self) -> ValidatorStats {
        self.stats.read().await.clone()
    }
}
