//! Prometheus exposition of validation metrics.
//!
//! The exporter installs a process-wide recorder, so these tests run serially and assert on
//! deltas rather than absolute values.

use crate::mock_infrastructure::{
    address_only_location, extraction_job, geocoded_location, record_with_locations, test_config,
    ScriptedProvider, TestHarness,
};
use serial_test::serial;
use std::sync::Arc;

/// Sums every sample of `name` in Prometheus text output, across label sets.
fn sample_total(rendered: &str, name: &str) -> f64 {
    rendered
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| {
            line.strip_prefix(name).is_some_and(|rest| rest.starts_with(' ') || rest.starts_with('{'))
        })
        .filter_map(|line| line.rsplit(' ').next()?.parse::<f64>().ok())
        .sum()
}

async fn metrics_harness(providers: Vec<Arc<ScriptedProvider>>) -> TestHarness {
    let mut config = test_config();
    config.metrics.enabled = true;
    TestHarness::with_providers(config, providers).await
}

#[tokio::test]
#[serial]
async fn test_rejections_are_exported() {
    let h = metrics_harness(vec![Arc::new(ScriptedProvider::empty("A"))]).await;
    let metrics = h.runtime.metrics_collector();
    let before = metrics.render();

    let record = record_with_locations(vec![
        geocoded_location("Adams Pantry", 39.8017, -89.6440),
        address_only_location("Lost Pantry 1", "10 Unfindable Rd, Nowhere, IL 62999"),
        address_only_location("Lost Pantry 2", "11 Unfindable Rd, Nowhere, IL 62999"),
        address_only_location("Lost Pantry 3", "12 Unfindable Rd, Nowhere, IL 62999"),
    ]);
    h.processor().process_job_result(extraction_job("job-1", record)).await.unwrap();
    let after = metrics.render();

    let delta = |name: &str| sample_total(&after, name) - sample_total(&before, name);
    assert!(delta("locations_rejected_total") >= 3.0);
    assert!(delta("locations_rejected_by_reason_total") >= 3.0);
    assert!(delta("validator_jobs_total") >= 1.0);
    assert!(after.contains("reason=\"missing_coordinates\""));
    assert!(after.contains("validator_rejection_rate"));
    assert!(after.contains("validator_processing_time_seconds"));
}

#[tokio::test]
#[serial]
async fn test_provider_and_cache_counters_are_exported() {
    let a = Arc::new(ScriptedProvider::matching("metrics-provider", 39.7817, -89.6501));
    let h = metrics_harness(vec![a]).await;
    let metrics = h.runtime.metrics_collector();

    for job_id in ["job-1", "job-2"] {
        let record = record_with_locations(vec![address_only_location(
            "Pantry",
            "1 Main St, Springfield, IL 62701",
        )]);
        h.processor().process_job_result(extraction_job(job_id, record)).await.unwrap();
    }

    let rendered = metrics.render();
    assert!(rendered.contains("geocoding_provider_success_total"));
    assert!(rendered.contains("provider=\"metrics-provider\""));
    assert!(sample_total(&rendered, "geocoding_cache_hits_total") >= 1.0);
    assert!(sample_total(&rendered, "geocoding_cache_misses_total") >= 1.0);

    let stats = metrics.get_internal_metrics().await;
    assert_eq!(stats.jobs_passed, 2);
    assert_eq!(stats.cache_hits, 1);
}

#[tokio::test]
#[serial]
async fn test_disabled_exporter_keeps_internal_stats() {
    let h = TestHarness::with_providers(test_config(), vec![Arc::new(ScriptedProvider::empty("A"))]).await;

    let record = record_with_locations(vec![geocoded_location("Adams Pantry", 39.8017, -89.6440)]);
    h.processor().process_job_result(extraction_job("job-1", record)).await.unwrap();

    let stats = h.runtime.metrics_collector().get_internal_metrics().await;
    assert_eq!(stats.jobs_total, 1);
    assert_eq!(stats.locations_total, 1);
    assert_eq!(stats.locations_rejected, 0);
    assert!(stats.last_rejection_rate.abs() < f64::EPSILON);
}
