//! Builder pattern for initializing the Locus runtime with configurable components.

use crate::{
    config::{AppConfig, ProviderConfig},
    geocoding::{
        build_provider, CircuitBreaker, EnricherSettings, GeocodeCache, GeocodeProvider,
        GeocodingEnricher, HttpClient, ProviderSlot, CACHE_KEY_PREFIX,
    },
    metrics::MetricsCollector,
    queue::{InMemoryJobQueue, JobQueue, QueueRouter, SqliteJobQueue},
    scoring::ConfidenceScorer,
    store::{sqlite::connect_pool, CapacityLimit, InMemoryStateStore, SqliteStateStore, StateStore},
    validation::{
        InMemoryValidationRepository, SqliteValidationRepository, ValidationDeps,
        ValidationProcessor, ValidationRepository,
    },
};
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{lifecycle::LocusRuntime, LocusComponents};

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Metrics collector initialization failed
    #[error("Failed to initialize metrics collector: {0}")]
    MetricsInitialization(String),

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// A backend or client could not be created
    #[error("Runtime initialization failed: {0}")]
    Initialization(String),
}

/// Configuration options for the runtime builder.
#[derive(Clone)]
struct RuntimeOptions {
    enable_store_purge: bool,
    purge_interval: Duration,
    shutdown_channel_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            enable_store_purge: true,
            purge_interval: Duration::from_secs(60),
            shutdown_channel_capacity: 16,
        }
    }
}

/// Backends supplied by the caller instead of being created from configuration.
#[derive(Default)]
struct Overrides {
    state_store: Option<Arc<dyn StateStore>>,
    job_queue: Option<Arc<dyn JobQueue>>,
    repository: Option<Arc<dyn ValidationRepository>>,
    metrics: Option<Arc<MetricsCollector>>,
    providers: Vec<(ProviderConfig, Arc<dyn GeocodeProvider>)>,
}

/// Builder for constructing a [`LocusRuntime`] with configurable components.
///
/// Backends not supplied explicitly are created from the configuration:
///
/// - `store.database_url` set: `SQLite` state store and validation repository sharing one
///   pool; otherwise in-process implementations
/// - `queue.database_url` set: `SQLite` job queue; otherwise an in-process queue
/// - one HTTP client, circuit breaker and cache namespace per configured provider
///
/// # Examples
///
/// ```no_run
/// # use locus_core::{config::AppConfig, runtime::LocusRuntimeBuilder};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AppConfig::load()?;
///
/// let runtime = LocusRuntimeBuilder::new()
///     .with_config(config)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct LocusRuntimeBuilder {
    config: Option<AppConfig>,
    options: RuntimeOptions,
    overrides: Overrides,
}

impl LocusRuntimeBuilder {
    /// Creates a new runtime builder with default options.
    #[must_use]
    pub fn new() -> Self {
        Self { config: None, options: RuntimeOptions::default(), overrides: Overrides::default() }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses `store` for circuit breakers and the geocode cache.
    #[must_use]
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.overrides.state_store = Some(store);
        self
    }

    #[must_use]
    pub fn with_job_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.overrides.job_queue = Some(queue);
        self
    }

    #[must_use]
    pub fn with_repository(mut self, repository: Arc<dyn ValidationRepository>) -> Self {
        self.overrides.repository = Some(repository);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.overrides.metrics = Some(metrics);
        self
    }

    /// Appends a provider client to the fallback chain.
    ///
    /// Once any provider is added, the configured provider list is ignored. `config` supplies
    /// the timeout and circuit breaker settings for the slot.
    #[must_use]
    pub fn with_provider(mut self, config: ProviderConfig, provider: Arc<dyn GeocodeProvider>) -> Self {
        self.overrides.providers.push((config, provider));
        self
    }

    /// Sets how often expired store entries are purged (default: 60s).
    #[must_use]
    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.options.purge_interval = interval;
        self
    }

    #[must_use]
    pub fn disable_store_purge(mut self) -> Self {
        self.options.enable_store_purge = false;
        self
    }

    /// Sets custom shutdown channel capacity (default: 16).
    #[must_use]
    pub fn with_shutdown_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.shutdown_channel_capacity = capacity;
        self
    }

    /// Builds the runtime, initializing all components and starting background tasks.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError` if configuration is missing/invalid or a backend cannot be
    /// opened.
    pub async fn build(self) -> Result<LocusRuntime, RuntimeError> {
        let Self { config, options, overrides } = self;

        let config = config.ok_or_else(|| {
            RuntimeError::ConfigValidation("No configuration provided".to_string())
        })?;

        config.validate().map_err(RuntimeError::ConfigValidation)?;

        info!(
            environment = %config.environment,
            validation_enabled = config.validator.enabled,
            enrichment_enabled = config.enrichment.enabled,
            store_purge_enabled = options.enable_store_purge,
            "Initializing Locus runtime"
        );

        let (shutdown_tx, _) = broadcast::channel::<()>(options.shutdown_channel_capacity);

        let metrics_collector = match overrides.metrics {
            Some(metrics) => metrics,
            None if config.metrics.enabled => Arc::new(
                MetricsCollector::new()
                    .map_err(|e| RuntimeError::MetricsInitialization(e.to_string()))?,
            ),
            None => Arc::new(MetricsCollector::without_exporter()),
        };
        debug!("Metrics collector initialized");

        let store_pool = match config.store.database_url.as_deref() {
            Some(url) if overrides.state_store.is_none() || overrides.repository.is_none() => {
                Some(
                    connect_pool(url)
                        .await
                        .map_err(|e| RuntimeError::Initialization(format!("State store: {e}")))?,
                )
            }
            _ => None,
        };

        let state_store = match overrides.state_store {
            Some(store) => store,
            None => Self::create_state_store(&config, store_pool.clone()).await?,
        };
        debug!("State store initialized");

        let repository = match overrides.repository {
            Some(repository) => repository,
            None => Self::create_repository(&config, store_pool).await?,
        };
        debug!("Validation repository initialized");

        let job_queue = match overrides.job_queue {
            Some(queue) => queue,
            None => Self::create_job_queue(&config).await?,
        };
        debug!("Job queue initialized");

        let enricher = if config.enrichment.enabled {
            let providers = if overrides.providers.is_empty() {
                Self::create_providers(&config)?
            } else {
                overrides.providers
            };
            let slots: Vec<ProviderSlot> = providers
                .into_iter()
                .map(|(provider_config, provider)| {
                    let breaker = CircuitBreaker::new(
                        provider.name().to_string(),
                        state_store.clone(),
                        metrics_collector.clone(),
                        provider_config.circuit_breaker_threshold,
                        provider_config.cooldown(),
                    );
                    ProviderSlot::new(provider, breaker, provider_config.timeout())
                })
                .collect();

            let enricher = GeocodingEnricher::new(
                slots,
                GeocodeCache::new(state_store.clone(), config.cache_ttl()),
                metrics_collector.clone(),
                EnricherSettings {
                    max_retries: config.validator.max_retries,
                    retry_delay: config.retry_delay(),
                    location_concurrency: config.validator.location_concurrency,
                },
            );
            info!(providers = ?enricher.provider_names(), "Geocoding enricher initialized");
            Some(Arc::new(enricher))
        } else {
            debug!("Geocoding enrichment disabled");
            None
        };

        let processor = Arc::new(ValidationProcessor::new(ValidationDeps {
            enricher: enricher.clone(),
            scorer: ConfidenceScorer::new(config.validator.rejection_threshold),
            repository: repository.clone(),
            queue: job_queue.clone(),
            router: QueueRouter::new(&config),
            metrics: metrics_collector.clone(),
            job_timeout: config.job_timeout(),
        }));
        debug!("Validation processor initialized");

        let components = LocusComponents::new(
            metrics_collector,
            state_store,
            job_queue,
            repository,
            enricher,
            processor,
        );
        let runtime = LocusRuntime::new(
            components,
            shutdown_tx,
            config,
            options.enable_store_purge.then_some(options.purge_interval),
        );

        info!("Locus runtime initialization complete");

        Ok(runtime)
    }

    async fn create_state_store(
        config: &AppConfig,
        pool: Option<SqlitePool>,
    ) -> Result<Arc<dyn StateStore>, RuntimeError> {
        let limit = CapacityLimit::new(CACHE_KEY_PREFIX, config.enrichment.cache_max_entries);
        match pool {
            Some(pool) => {
                let store = SqliteStateStore::from_pool(pool)
                    .await
                    .map_err(|e| RuntimeError::Initialization(format!("State store: {e}")))?;
                Ok(Arc::new(store.with_capacity_limit(limit)))
            }
            None => Ok(Arc::new(InMemoryStateStore::with_capacity_limit(limit))),
        }
    }

    async fn create_repository(
        config: &AppConfig,
        pool: Option<SqlitePool>,
    ) -> Result<Arc<dyn ValidationRepository>, RuntimeError> {
        match pool {
            Some(pool) => {
                let repository =
                    SqliteValidationRepository::from_pool(pool, config.validator.batch_size)
                        .await
                        .map_err(|e| RuntimeError::Initialization(format!("Repository: {e}")))?;
                Ok(Arc::new(repository))
            }
            None => Ok(Arc::new(InMemoryValidationRepository::new())),
        }
    }

    async fn create_job_queue(config: &AppConfig) -> Result<Arc<dyn JobQueue>, RuntimeError> {
        match config.queue.database_url.as_deref() {
            Some(url) => {
                let ttl = Duration::from_secs(config.validator.result_ttl_seconds);
                let queue = SqliteJobQueue::new(url, ttl)
                    .await
                    .map_err(|e| RuntimeError::Initialization(format!("Job queue: {e}")))?;
                Ok(Arc::new(queue))
            }
            None => Ok(Arc::new(InMemoryJobQueue::new())),
        }
    }

    fn create_providers(
        config: &AppConfig,
    ) -> Result<Vec<(ProviderConfig, Arc<dyn GeocodeProvider>)>, RuntimeError> {
        config
            .enrichment
            .providers
            .iter()
            .map(|provider_config| {
                let http = HttpClient::new(
                    provider_config.max_concurrent_requests,
                    &config.enrichment.user_agent,
                )
                .map_err(|e| {
                    RuntimeError::Initialization(format!(
                        "HTTP client for {}: {e}",
                        provider_config.name
                    ))
                })?;
                let provider = build_provider(provider_config, Arc::new(http));
                Ok((provider_config.clone(), provider))
            })
            .collect()
    }
}

impl Default for LocusRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
