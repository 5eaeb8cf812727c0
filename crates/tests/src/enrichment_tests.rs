//! Fallback chain, retry, circuit breaker and cache behaviour through the full processor.

use crate::mock_infrastructure::{
    address_only_location, extraction_job, merge_locations, provider_config, record_with_locations,
    springfield_location, test_config, ScriptedProvider, TestHarness,
};
use locus_core::{
    geocoding::{GeocodeMatch, ProviderError},
    types::{AttemptOutcome, EnrichmentAction, PostalAddress},
};
use serde_json::json;
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn test_failover_retries_transient_errors_only() {
    let a = Arc::new(ScriptedProvider::failing("A", ProviderError::Timeout));
    let b = Arc::new(ScriptedProvider::failing("B", ProviderError::HttpError(400, "bad".into())));
    let c = Arc::new(ScriptedProvider::matching("C", 39.7817, -89.6501));
    let h = TestHarness::with_providers(test_config(), vec![a.clone(), b.clone(), c.clone()]).await;

    let result = h
        .processor()
        .process_job_result(extraction_job("job-1", record_with_locations(vec![springfield_location()])))
        .await
        .unwrap();

    assert_eq!(a.forward_calls(), 3, "timeouts are retried up to max_retries attempts");
    assert_eq!(b.forward_calls(), 1, "client errors fail over immediately");
    assert_eq!(c.forward_calls(), 1);

    let location = &result.record.unwrap().locations[0];
    assert_eq!(location.geocoding_source.as_deref(), Some("C"));
    assert_eq!(location.coordinates(), Some((39.7817, -89.6501)));

    let notes = location.validation_notes.as_ref().unwrap();
    let forward = notes.coordinate_provenance().unwrap();
    let outcomes: Vec<_> = forward.attempts.iter().map(|t| (t.provider.as_str(), t.outcome, t.calls)).collect();
    assert_eq!(
        outcomes,
        vec![
            ("A", AttemptOutcome::Failed, 3),
            ("B", AttemptOutcome::Failed, 1),
            ("C", AttemptOutcome::Success, 1),
        ]
    );

    let stats = h.runtime.metrics_collector().get_internal_metrics().await;
    assert_eq!(stats.provider_failure.get("A"), Some(&1));
    assert_eq!(stats.provider_failure.get("B"), Some(&1));
    assert_eq!(stats.provider_success.get("C"), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_recovered_provider_needs_no_failover() {
    let a = Arc::new(
        ScriptedProvider::matching("A", 39.7817, -89.6501)
            .then(Err(ProviderError::ConnectionFailed("reset".into())))
            .then(Err(ProviderError::HttpError(503, "busy".into()))),
    );
    let b = Arc::new(ScriptedProvider::matching("B", 40.0, -89.0));
    let h = TestHarness::with_providers(test_config(), vec![a.clone(), b.clone()]).await;

    let result = h
        .processor()
        .process_job_result(extraction_job("job-1", record_with_locations(vec![springfield_location()])))
        .await
        .unwrap();

    assert_eq!(a.forward_calls(), 3);
    assert_eq!(b.forward_calls(), 0);
    assert_eq!(result.record.unwrap().locations[0].geocoding_source.as_deref(), Some("A"));
}

#[tokio::test]
async fn test_open_circuit_skips_provider() {
    let mut config = test_config();
    config.enrichment.providers = vec![provider_config("A", 2), provider_config("B", 5)];

    let a = Arc::new(ScriptedProvider::failing("A", ProviderError::HttpError(401, "bad token".into())));
    let b = Arc::new(ScriptedProvider::matching("B", 39.7817, -89.6501));
    let h = TestHarness::with_providers(config, vec![a.clone(), b.clone()]).await;

    for (index, street) in ["1 Main St", "2 Main St", "3 Main St"].iter().enumerate() {
        let address = format!("{street}, Springfield, IL 62701");
        let record = record_with_locations(vec![address_only_location("Pantry", &address)]);
        let result = h
            .processor()
            .process_job_result(extraction_job(&format!("job-{index}"), record))
            .await
            .unwrap();
        assert_eq!(result.record.unwrap().locations[0].geocoding_source.as_deref(), Some("B"));
    }

    assert_eq!(a.forward_calls(), 2, "third job must not reach the open provider");
    assert_eq!(b.forward_calls(), 3);

    let stats = h.runtime.metrics_collector().get_internal_metrics().await;
    assert_eq!(stats.circuit_breaker_opened.get("A"), Some(&1));

    let merged = h.merge_jobs().await;
    let last = merge_locations(merged.last().unwrap());
    let attempts = &last[0].validation_notes.as_ref().unwrap().provenance[0].attempts;
    assert_eq!(attempts[0].provider, "A");
    assert_eq!(attempts[0].outcome, AttemptOutcome::CircuitOpen);
    assert_eq!(attempts[0].calls, 0);
}

#[tokio::test]
async fn test_duplicate_addresses_share_one_lookup() {
    let a = Arc::new(ScriptedProvider::matching("A", 39.7817, -89.6501));
    let h = TestHarness::with_providers(test_config(), vec![a.clone()]).await;

    let record = record_with_locations(vec![
        address_only_location("Pantry", "1 Main St, Springfield, IL 62701"),
        address_only_location("Pantry Annex", "1 Main St, Springfield, IL 62701"),
    ]);
    let result = h.processor().process_job_result(extraction_job("job-1", record)).await.unwrap();

    assert_eq!(a.forward_calls(), 1);
    let locations = result.record.unwrap().locations;
    assert_eq!(locations[0].coordinates(), locations[1].coordinates());

    let again = record_with_locations(vec![springfield_location()]);
    let result = h.processor().process_job_result(extraction_job("job-2", again)).await.unwrap();

    assert_eq!(a.forward_calls(), 1, "later jobs are served from the shared cache");
    let provenance = result.record.unwrap().locations[0].validation_notes.clone().unwrap().provenance;
    assert!(provenance[0].cache_hit);

    let stats = h.runtime.metrics_collector().get_internal_metrics().await;
    assert!(stats.cache_hits >= 2);
    assert!(stats.cache_misses >= 1);
}

#[tokio::test]
async fn test_empty_answers_are_cached_and_fall_through() {
    let a = Arc::new(ScriptedProvider::empty("A"));
    let b = Arc::new(ScriptedProvider::matching("B", 39.7817, -89.6501));
    let h = TestHarness::with_providers(test_config(), vec![a.clone(), b.clone()]).await;

    for job_id in ["job-1", "job-2"] {
        let record = record_with_locations(vec![springfield_location()]);
        let result = h.processor().process_job_result(extraction_job(job_id, record)).await.unwrap();
        assert_eq!(result.record.unwrap().locations[0].geocoding_source.as_deref(), Some("B"));
    }

    assert_eq!(a.forward_calls(), 1);
    assert_eq!(b.forward_calls(), 1);
}

#[tokio::test]
async fn test_reverse_lookup_adds_missing_address() {
    let address = PostalAddress {
        address_1: Some("200 E Adams St".into()),
        city: Some("Springfield".into()),
        state_province: Some("IL".into()),
        postal_code: Some("62701".into()),
        ..PostalAddress::default()
    };
    let a = Arc::new(ScriptedProvider::empty("A").with_reverse(address));
    let h = TestHarness::with_providers(test_config(), vec![a.clone()]).await;

    let record = record_with_locations(vec![json!({
        "name": "Capitol Pantry",
        "latitude": 39.7983,
        "longitude": -89.6544
    })]);
    let result = h.processor().process_job_result(extraction_job("job-1", record)).await.unwrap();

    assert_eq!(a.reverse_calls(), 1);
    assert_eq!(a.forward_calls(), 0);
    let location = &result.record.unwrap().locations[0];
    let filled = location.primary_address().unwrap();
    assert_eq!(filled.city.as_deref(), Some("Springfield"));
    assert_eq!(filled.postal_code.as_deref(), Some("62701"));
    assert_eq!(location.confidence_score, Some(100));

    let provenance = &location.validation_notes.as_ref().unwrap().provenance[0];
    assert_eq!(provenance.action, EnrichmentAction::Reverse);
    assert_eq!(provenance.provider.as_deref(), Some("A"));
}

#[tokio::test]
async fn test_postal_fill_never_overwrites() {
    let found = PostalAddress {
        address_1: Some("Somewhere Else".into()),
        city: Some("Chatham".into()),
        postal_code: Some("62701".into()),
        ..PostalAddress::default()
    };
    let a = Arc::new(ScriptedProvider::empty("A").with_reverse(found));
    let h = TestHarness::with_providers(test_config(), vec![a.clone()]).await;

    let record = record_with_locations(vec![json!({
        "name": "Capitol Pantry",
        "latitude": 39.7983,
        "longitude": -89.6544,
        "address": [{"address_1": "200 E Adams St", "city": "Springfield", "state_province": "IL"}]
    })]);
    let result = h.processor().process_job_result(extraction_job("job-1", record)).await.unwrap();

    let location = &result.record.unwrap().locations[0];
    let address = location.primary_address().unwrap();
    assert_eq!(address.address_1.as_deref(), Some("200 E Adams St"));
    assert_eq!(address.city.as_deref(), Some("Springfield"));
    assert_eq!(address.postal_code.as_deref(), Some("62701"));

    let provenance = &location.validation_notes.as_ref().unwrap().provenance[0];
    assert_eq!(provenance.action, EnrichmentAction::PostalFill);
    assert_eq!(provenance.fields, vec!["postal_code".to_string()]);
}

#[tokio::test]
async fn test_low_resolution_centroid_is_penalized() {
    let a = Arc::new(
        ScriptedProvider::new(
            "census",
            Ok(Some(GeocodeMatch::centroid(39.80, -89.64))),
        )
        .low_resolution(),
    );
    let h = TestHarness::with_providers(test_config(), vec![a]).await;

    let result = h
        .processor()
        .process_job_result(extraction_job("job-1", record_with_locations(vec![springfield_location()])))
        .await
        .unwrap();

    let location = &result.record.unwrap().locations[0];
    assert_eq!(location.confidence_score, Some(75));
    let penalties = &location.validation_notes.as_ref().unwrap().penalties;
    assert!(penalties.contains(&"low_resolution_provider:-10".to_string()));
    assert!(penalties.contains(&"centroid_geocode:-15".to_string()));
}

#[tokio::test]
async fn test_enrichment_disabled_makes_no_calls() {
    let mut config = test_config();
    config.enrichment.enabled = false;
    let a = Arc::new(ScriptedProvider::matching("A", 39.7817, -89.6501));
    let h = TestHarness::with_providers(config, vec![a.clone()]).await;

    let result = h
        .processor()
        .process_job_result(extraction_job("job-1", record_with_locations(vec![springfield_location()])))
        .await
        .unwrap();

    assert_eq!(a.calls(), 0);
    assert!(h.runtime.components().enricher().is_none());
    let location = &result.record.unwrap().locations[0];
    assert_eq!(location.confidence_score, Some(0));
    assert!(location.is_rejected());
}

#[tokio::test]
async fn test_exhausted_chain_is_recorded_not_fatal() {
    let a = Arc::new(ScriptedProvider::failing("A", ProviderError::InvalidResponse("garbage".into())));
    let b = Arc::new(ScriptedProvider::empty("B"));
    let h = TestHarness::with_providers(test_config(), vec![a, b]).await;

    let result = h
        .processor()
        .process_job_result(extraction_job("job-1", record_with_locations(vec![springfield_location()])))
        .await
        .unwrap();

    assert_eq!(result.errors.len(), 1);
    let location = &result.record.unwrap().locations[0];
    assert!(location.coordinates().is_none());
    let notes = location.validation_notes.as_ref().unwrap();
    assert!(notes.messages.contains(&"geocoding_exhausted:forward".to_string()));
    assert_eq!(notes.rejection_reason.as_deref(), Some("missing_coordinates"));
    assert_eq!(h.merge_jobs().await.len(), 1);
}
