//! End-to-end validation jobs: routing, scoring, rejection accounting and idempotency.

use crate::mock_infrastructure::{
    address_only_location, extraction_job, geocoded_location, merge_locations,
    record_with_locations, springfield_location, test_config, ScriptedProvider, TestHarness,
};
use locus_core::{
    queue::{JobPayload, JobQueue, Stage},
    types::ValidationStatus,
    validation::JobState,
};
use serde_json::{json, Value};
use std::sync::Arc;

#[tokio::test]
async fn test_string_address_is_geocoded_and_verified() {
    let a = Arc::new(ScriptedProvider::matching("A", 39.7817, -89.6501));
    let h = TestHarness::with_providers(test_config(), vec![a.clone()]).await;

    let result = h
        .processor()
        .process_job_result(extraction_job("job-1", record_with_locations(vec![springfield_location()])))
        .await
        .unwrap();

    assert_eq!(result.state, JobState::Forwarded);
    assert!(result.validated);
    assert!(result.errors.is_empty());
    assert_eq!(a.queries(), vec!["1 Main St, Springfield, IL 62701".to_string()]);

    let record = result.record.unwrap();
    let location = &record.locations[0];
    assert_eq!(location.confidence_score, Some(100));
    assert_eq!(location.validation_status, Some(ValidationStatus::Verified));
    assert_eq!(location.geocoding_source.as_deref(), Some("A"));
    assert_eq!(record.organizations[0].confidence_score, Some(100));

    let merged = h.merge_jobs().await;
    let [JobPayload::Merge(job)] = &merged[..] else {
        panic!("expected one merge job, got {merged:?}");
    };
    assert!(job.validated);
    assert_eq!(job.job_id, "job-1");
    assert!(!result.merge_job_id.is_empty());
    assert_eq!(merge_locations(&merged[0])[0].confidence_score, Some(100));
    assert!(h.repository.get("job-1").is_some());
}

#[tokio::test]
async fn test_batch_rejection_rate() {
    let a = Arc::new(ScriptedProvider::empty("A"));
    let h = TestHarness::with_providers(test_config(), vec![a.clone()]).await;

    let record = record_with_locations(vec![
        geocoded_location("Adams Pantry", 39.8017, -89.6440),
        geocoded_location("Capitol Pantry", 39.7983, -89.6544),
        address_only_location("Lost Pantry 1", "10 Unfindable Rd, Nowhere, IL 62999"),
        address_only_location("Lost Pantry 2", "11 Unfindable Rd, Nowhere, IL 62999"),
        address_only_location("Lost Pantry 3", "12 Unfindable Rd, Nowhere, IL 62999"),
    ]);
    let result = h.processor().process_job_result(extraction_job("job-1", record)).await.unwrap();

    assert_eq!(a.forward_calls(), 3);
    assert_eq!(result.rejection.total, 5);
    assert_eq!(result.rejection.rejected, 3);
    assert!((result.rejection.rejection_rate - 60.0).abs() < f64::EPSILON);

    let snapshot = h.runtime.metrics_collector().rejection_snapshot().await;
    assert_eq!(snapshot.rejected, 3);
    assert_eq!(snapshot.rejected_by_reason.get("missing_coordinates"), Some(&3));

    let record = result.record.unwrap();
    assert_eq!(record.locations.iter().filter(|l| l.is_rejected()).count(), 3);
    // Rejected locations are forwarded, not dropped.
    assert_eq!(merge_locations(&h.merge_jobs().await[0]).len(), 5);
    assert_eq!(record.organizations[0].confidence_score, Some(40));
    assert_eq!(record.organizations[0].validation_status, Some(ValidationStatus::NeedsReview));
}

#[tokio::test]
async fn test_disabled_validation_bypasses_everything() {
    let mut config = test_config();
    config.validator.enabled = false;
    let a = Arc::new(ScriptedProvider::matching("A", 39.7817, -89.6501));
    let h = TestHarness::with_providers(config, vec![a.clone()]).await;

    let router = h.processor().router();
    assert_eq!(router.next_stage(Stage::Extraction), Some(Stage::Merge));

    let payload = record_with_locations(vec![springfield_location()]);
    let result = h.processor().process_job_result(extraction_job("job-1", payload.clone())).await.unwrap();

    assert!(!result.validated);
    assert_eq!(a.calls(), 0);
    assert_eq!(h.repository.attempts(), 0);
    match &h.merge_jobs().await[..] {
        [JobPayload::Merge(job)] => {
            assert!(!job.validated);
            assert_eq!(job.data, payload);
        }
        other => panic!("unexpected merge queue contents: {other:?}"),
    }
}

#[tokio::test]
async fn test_dispatch_routes_by_validation_flag() {
    let h = TestHarness::with_providers(test_config(), vec![]).await;
    let router = h.processor().router();

    let stage = router
        .dispatch_extraction_result(h.queue.as_ref(), extraction_job("job-1", json!({"location": []})))
        .await
        .unwrap();

    assert_eq!(stage, Stage::Validation);
    assert_eq!(h.queue.len("validator").await.unwrap(), 1);
    assert_eq!(h.queue.len("merge").await.unwrap(), 0);
}

#[tokio::test]
async fn test_reprocessing_is_idempotent() {
    let a = Arc::new(ScriptedProvider::matching("A", 39.7817, -89.6501));
    let h = TestHarness::with_providers(test_config(), vec![a.clone()]).await;
    let payload = record_with_locations(vec![springfield_location()]);

    let first = h.processor().process_job_result(extraction_job("job-1", payload.clone())).await.unwrap();
    let second = h.processor().process_job_result(extraction_job("job-1", payload)).await.unwrap();

    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(a.forward_calls(), 1);
    let (first, second) = (first.record.unwrap(), second.record.unwrap());
    assert_eq!(first.locations[0].coordinates(), second.locations[0].coordinates());
    assert_eq!(first.locations[0].confidence_score, second.locations[0].confidence_score);
    assert_eq!(first.locations[0].validation_status, second.locations[0].validation_status);

    // Feeding a validated record back yields the same record.
    let validated = serde_json::to_value(&first).unwrap();
    let again = h
        .processor()
        .process_job_result(extraction_job("job-1", validated))
        .await
        .unwrap()
        .record
        .unwrap();
    assert_eq!(again, first);
    assert_eq!(a.forward_calls(), 1);
}

#[tokio::test]
async fn test_scores_are_bounded_and_match_status() {
    let h = TestHarness::with_providers(test_config(), vec![Arc::new(ScriptedProvider::empty("A"))]).await;

    let record = record_with_locations(vec![
        geocoded_location("Adams Pantry", 39.8017, -89.6440),
        json!({"name": "No Postal", "latitude": 39.80, "longitude": -89.64, "address": [{"address_1": "5 Oak St", "city": "Springfield", "state_province": "IL"}]}),
        json!({"name": "Wrong State", "latitude": 39.80, "longitude": -89.64, "address": [{"address_1": "5 Oak St", "city": "Denver", "state_province": "CO", "postal_code": "80202"}]}),
        json!({"name": "Placeholder", "latitude": 39.80, "longitude": -89.64, "address": [{"address_1": "123 Main St", "city": "Anytown", "state_province": "IL", "postal_code": "62701"}]}),
        json!({"name": "Test Pantry", "latitude": 39.80, "longitude": -89.64}),
        json!({"name": "Null Island", "latitude": 0.0, "longitude": 0.0, "address": [{"address_1": "5 Oak St", "city": "Springfield", "state_province": "IL", "postal_code": "62701"}]}),
        json!({"name": "No Coordinates", "latitude": null, "longitude": null}),
        geocoded_location("London Pantry", 51.5074, -0.1278),
    ]);
    let result = h.processor().process_job_result(extraction_job("job-1", record)).await.unwrap();
    let record = result.record.unwrap();

    let threshold = test_config().validator.rejection_threshold;
    for location in &record.locations {
        let score = location.confidence_score.unwrap();
        assert!(score <= 100);
        assert_eq!(location.is_rejected(), score < threshold, "{:?}", location.name);
    }

    let by_name = |name: &str| {
        record
            .locations
            .iter()
            .find(|l| l.name.as_deref() == Some(name))
            .unwrap()
    };
    let reason = |name: &str| {
        by_name(name).validation_notes.as_ref().and_then(|n| n.rejection_reason.clone())
    };

    assert_eq!(by_name("Adams Pantry").confidence_score, Some(100));
    assert_eq!(by_name("Wrong State").confidence_score, Some(80));
    assert_eq!(by_name("Placeholder").validation_status, Some(ValidationStatus::NeedsReview));
    assert_eq!(by_name("Test Pantry").confidence_score, Some(5));
    assert_eq!(reason("Test Pantry").as_deref(), Some("test_data"));
    assert_eq!(by_name("Null Island").confidence_score, Some(0));
    assert_eq!(reason("Null Island").as_deref(), Some("zero_coordinates"));
    assert_eq!(by_name("No Coordinates").confidence_score, Some(0));
    assert_eq!(reason("No Coordinates").as_deref(), Some("missing_coordinates"));
    assert_eq!(by_name("London Pantry").confidence_score, Some(5));
    assert_eq!(reason("London Pantry").as_deref(), Some("outside_us_bounds"));

    let penalties = &by_name("No Postal").validation_notes.as_ref().unwrap().penalties;
    assert!(penalties.contains(&"missing_postal_code:-5".to_string()));
}

#[tokio::test]
async fn test_malformed_payload_is_forwarded_with_error() {
    let h = TestHarness::with_providers(test_config(), vec![Arc::new(ScriptedProvider::empty("A"))]).await;

    let result = h
        .processor()
        .process_job_result(extraction_job("job-1", Value::String("the model refused".into())))
        .await
        .unwrap();

    assert!(result.errors[0].starts_with("parse_error"));
    match &h.merge_jobs().await[..] {
        [JobPayload::Merge(job)] => {
            assert!(job.validated);
            assert!(job.validation_errors[0].starts_with("parse_error"));
        }
        other => panic!("unexpected merge queue contents: {other:?}"),
    }
}

#[tokio::test]
async fn test_fenced_model_output_is_parsed() {
    let a = Arc::new(ScriptedProvider::matching("A", 39.7817, -89.6501));
    let h = TestHarness::with_providers(test_config(), vec![a]).await;
    let text = format!(
        "Here is the record:\n```json\n{}\n```",
        record_with_locations(vec![springfield_location()])
    );

    let result = h.processor().process_job_result(extraction_job("job-1", Value::String(text))).await.unwrap();

    assert!(result.errors.is_empty());
    assert_eq!(result.record.unwrap().locations[0].confidence_score, Some(100));
}

#[tokio::test]
async fn test_enqueue_failure_fails_job() {
    let h = TestHarness::with_providers(test_config(), vec![Arc::new(ScriptedProvider::empty("A"))]).await;
    h.queue.set_reject_enqueue(true);

    let error = h
        .processor()
        .process_job_result(extraction_job("job-1", record_with_locations(vec![])))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), "enqueue");
    let stats = h.runtime.metrics_collector().get_internal_metrics().await;
    assert_eq!(stats.jobs_failed, 1);
}
