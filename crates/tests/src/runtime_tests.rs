//! Runtime assembly over `SQLite` backends, and state shared between runtimes.
//!
//! Each test opens its own database file under the system temp directory, so runtimes built
//! from it behave like separate worker processes sharing one store.

use crate::mock_infrastructure::{
    address_only_location, extraction_job, provider_config, record_with_locations,
    springfield_location, test_config, ScriptedProvider,
};
use locus_core::{
    config::AppConfig,
    geocoding::{GeocodeProvider, ProviderError},
    queue::{JobPayload, JobQueue, Stage},
    runtime::{LocusRuntime, RuntimeError},
    validation::SqliteValidationRepository,
};
use std::{path::PathBuf, sync::Arc};
use tokio::time::{timeout, Duration};

struct TempDatabase {
    path: PathBuf,
}

impl TempDatabase {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("locus-test-{}.db", uuid::Uuid::new_v4()));
        Self { path }
    }

    fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }
}

impl Drop for TempDatabase {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.path.display()));
        }
    }
}

fn sqlite_config(db: &TempDatabase, threshold: u32) -> AppConfig {
    let mut config = test_config();
    config.store.database_url = Some(db.url());
    config.queue.database_url = Some(db.url());
    config.enrichment.providers = vec![provider_config("A", threshold), provider_config("B", 5)];
    config
}

async fn sqlite_runtime(config: AppConfig, providers: &[Arc<ScriptedProvider>]) -> LocusRuntime {
    let mut builder = LocusRuntime::builder().disable_store_purge();
    for provider in providers {
        let threshold = config
            .enrichment
            .providers
            .iter()
            .find(|p| p.name == provider.name())
            .map_or(5, |p| p.circuit_breaker_threshold);
        builder = builder.with_provider(provider_config(provider.name(), threshold), provider.clone());
    }
    builder.with_config(config).build().await.expect("sqlite runtime should build")
}

#[tokio::test]
async fn test_sqlite_backends_end_to_end() {
    let db = TempDatabase::new();
    let a = Arc::new(ScriptedProvider::matching("A", 39.7817, -89.6501));
    let runtime = sqlite_runtime(sqlite_config(&db, 5), &[a.clone()]).await;
    let queue = runtime.components().job_queue().clone();
    let router = runtime.processor().router();

    let stage = router
        .dispatch_extraction_result(
            queue.as_ref(),
            extraction_job("job-1", record_with_locations(vec![springfield_location()])),
        )
        .await
        .unwrap();
    assert_eq!(stage, Stage::Validation);

    let claimed = queue.dequeue("validator").await.unwrap().expect("queued job");
    let JobPayload::Extraction(job) = claimed.payload else {
        panic!("expected extraction payload");
    };
    let result = runtime.processor().process_job_result(job).await.unwrap();
    queue.complete(&claimed.id).await.unwrap();

    assert_eq!(queue.len("validator").await.unwrap(), 0);
    assert_eq!(queue.len("merge").await.unwrap(), 1);
    assert_eq!(result.record.unwrap().locations[0].confidence_score, Some(100));

    let repository = SqliteValidationRepository::new(&db.url(), 100).await.unwrap();
    let stored = repository.fetch("job-1").await.unwrap();
    assert_eq!(stored[0].entity, "location");
    assert_eq!(stored[0].confidence_score, Some(100));
    assert_eq!(stored[0].geocoding_source.as_deref(), Some("A"));
    assert_eq!(stored[0].validation_status.as_deref(), Some("verified"));
    assert!(stored.iter().any(|row| row.entity == "organization"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_cache_shared_across_runtimes() {
    let db = TempDatabase::new();
    let first_provider = Arc::new(ScriptedProvider::matching("A", 39.7817, -89.6501));
    let second_provider = Arc::new(ScriptedProvider::matching("A", 39.7817, -89.6501));
    let first = sqlite_runtime(sqlite_config(&db, 5), &[first_provider.clone()]).await;
    let second = sqlite_runtime(sqlite_config(&db, 5), &[second_provider.clone()]).await;

    for (runtime, job_id) in [(&first, "job-1"), (&second, "job-2")] {
        runtime
            .processor()
            .process_job_result(extraction_job(job_id, record_with_locations(vec![springfield_location()])))
            .await
            .unwrap();
    }

    assert_eq!(first_provider.forward_calls(), 1);
    assert_eq!(second_provider.forward_calls(), 0, "second runtime reads the shared cache");

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn test_circuit_opened_by_one_runtime_is_seen_by_another() {
    let db = TempDatabase::new();
    let failing = || Arc::new(ScriptedProvider::failing("A", ProviderError::HttpError(403, "denied".into())));
    let (a1, a2) = (failing(), failing());
    let b = Arc::new(ScriptedProvider::matching("B", 39.7817, -89.6501));

    let first = sqlite_runtime(sqlite_config(&db, 1), &[a1.clone(), b.clone()]).await;
    let second = sqlite_runtime(sqlite_config(&db, 1), &[a2.clone(), b.clone()]).await;

    first
        .processor()
        .process_job_result(extraction_job("job-1", record_with_locations(vec![springfield_location()])))
        .await
        .unwrap();
    assert_eq!(a1.forward_calls(), 1);

    let other =
        record_with_locations(vec![address_only_location("Other Pantry", "9 Elm St, Springfield, IL 62702")]);
    let result = second.processor().process_job_result(extraction_job("job-2", other)).await.unwrap();

    assert_eq!(a2.forward_calls(), 0, "breaker state lives in the shared store");
    assert_eq!(result.record.unwrap().locations[0].geocoding_source.as_deref(), Some("B"));

    let stats = first.metrics_collector().get_internal_metrics().await;
    assert_eq!(stats.circuit_breaker_opened.get("A"), Some(&1));

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn test_builder_rejects_missing_and_invalid_config() {
    let missing = LocusRuntime::builder().build().await;
    assert!(matches!(missing, Err(RuntimeError::ConfigValidation(_))));

    let mut config = test_config();
    config.enrichment.providers = vec![provider_config("A", 5), provider_config("A", 5)];
    let duplicate = LocusRuntime::builder().with_config(config).build().await;
    assert!(matches!(duplicate, Err(RuntimeError::ConfigValidation(msg)) if msg.contains("Duplicate")));

    let mut config = test_config();
    config.store.database_url = Some("sqlite:///nonexistent-dir/locus/state.db".to_string());
    let unreachable = LocusRuntime::builder().with_config(config).build().await;
    assert!(matches!(unreachable, Err(RuntimeError::Initialization(_))));
}

#[tokio::test]
async fn test_shutdown_notifies_all_receivers() {
    let runtime = LocusRuntime::builder()
        .with_config(test_config())
        .build()
        .await
        .expect("runtime should build");

    let mut receivers: Vec<_> = (0..3).map(|_| runtime.shutdown_receiver()).collect();
    runtime.shutdown().await;

    for receiver in &mut receivers {
        let received = timeout(Duration::from_secs(1), receiver.recv()).await;
        assert!(received.is_ok(), "receiver should observe shutdown");
    }
}
