//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: Hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file specified by `LOCUS_CONFIG` env var
//! 3. **Environment variables**: `LOCUS__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`ValidatorConfig`]: Validation stage switches, thresholds, retries and timeouts
//! - [`EnrichmentConfig`]: Ordered geocoding provider chain and cache sizing
//! - [`QueueConfig`]: Queue names and worker pool sizing
//! - [`StoreConfig`]: Shared state store backing circuit breakers and the result cache
//! - [`MetricsConfig`]: Prometheus recorder installation
//! - [`LoggingConfig`]: Log level and format
//!
//! # Validation
//!
//! Configuration is validated at load time. Invalid configurations (e.g., an empty provider
//! chain with enrichment enabled, a rejection threshold above 100) return errors rather than
//! failing silently.
//!
//! # Example
//!
//! ```toml
//! [validator]
//! enabled = true
//! rejection_threshold = 10
//!
//! [[enrichment.providers]]
//! name = "arcgis"
//! kind = "arcgis"
//! api_key = "YOUR_KEY"
//! circuit_breaker_threshold = 5
//! circuit_breaker_cooldown_seconds = 300
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt, path::Path, time::Duration};

/// Validation stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Whether extraction output is routed through validation. Defaults to `true`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Queue validation jobs are pulled from. Defaults to `"validator"`.
    #[serde(default = "default_validator_queue")]
    pub queue_name: String,

    /// Seconds a finished job is retained before being purged. Defaults to `3600`.
    #[serde(default = "default_result_ttl_seconds")]
    pub result_ttl_seconds: u64,

    /// Only validate jobs whose payload belongs to [`schema_family`](Self::schema_family).
    /// Defaults to `false`.
    #[serde(default)]
    pub only_validate_schema: bool,

    /// Schema family accepted when `only_validate_schema` is set. Defaults to `"hsds"`.
    #[serde(default = "default_schema_family")]
    pub schema_family: String,

    /// Scores strictly below this value are rejected. Must be in `0..=100`. Defaults to `10`.
    #[serde(default = "default_rejection_threshold")]
    pub rejection_threshold: u8,

    /// Total attempts per provider before failing over. Defaults to `3`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between attempts in seconds; doubles each retry. Defaults to `1`.
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,

    /// Maximum jobs pulled per poll. Defaults to `100`.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on the processing of one job in seconds. Defaults to `600`.
    #[serde(default = "default_job_timeout_seconds")]
    pub job_timeout_seconds: u64,

    /// Locations of one job enriched concurrently. Defaults to `4`.
    #[serde(default = "default_location_concurrency")]
    pub location_concurrency: usize,
}

fn default_true() -> bool {
    true
}

fn default_validator_queue() -> String {
    "validator".to_string()
}

fn default_result_ttl_seconds() -> u64 {
    3600
}

fn default_schema_family() -> String {
    "hsds".to_string()
}

fn default_rejection_threshold() -> u8 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    1
}

fn default_batch_size() -> usize {
    100
}

fn default_job_timeout_seconds() -> u64 {
    600
}

fn default_location_concurrency() -> usize {
    4
}

/// Geocoding service implementation behind a configured provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// ArcGIS World Geocoding Service. High accuracy, requires an API key.
    ArcGis,
    /// OpenStreetMap Nominatim. Community data with forward and reverse lookups.
    Nominatim,
    /// US Census Bureau geocoder. Forward lookups only, low resolution.
    Census,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArcGis => f.write_str("arcgis"),
            Self::Nominatim => f.write_str("nominatim"),
            Self::Census => f.write_str("census"),
        }
    }
}

/// Configuration for a single geocoding provider in the fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Identifier recorded as `geocoding_source` and used in cache and breaker keys.
    pub name: String,

    /// Which client implementation to use.
    pub kind: ProviderKind,

    /// Overrides the provider's public endpoint. Used for self-hosted instances and tests.
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key or token, if the provider requires one.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-call timeout in seconds. Defaults to `30`.
    #[serde(default = "default_provider_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Marks the provider as a coarse source; results carry a scoring penalty.
    /// Defaults to `true` for [`ProviderKind::Census`] and `false` otherwise.
    #[serde(default)]
    pub low_resolution: Option<bool>,

    /// Consecutive failures before the circuit opens. Defaults to `5`.
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// Seconds an open circuit skips the provider. Defaults to `300`.
    #[serde(default = "default_circuit_breaker_cooldown_seconds")]
    pub circuit_breaker_cooldown_seconds: u64,

    /// Maximum in-flight requests to this provider from one process. Defaults to `8`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_provider_timeout_seconds() -> u64 {
    30
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_circuit_breaker_cooldown_seconds() -> u64 {
    300
}

fn default_max_concurrent_requests() -> usize {
    8
}

impl ProviderConfig {
    /// Creates a provider entry with default timeouts and breaker settings.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            base_url: None,
            api_key: None,
            timeout_seconds: default_provider_timeout_seconds(),
            low_resolution: None,
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_cooldown_seconds: default_circuit_breaker_cooldown_seconds(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }

    #[must_use]
    pub fn is_low_resolution(&self) -> bool {
        self.low_resolution.unwrap_or(self.kind == ProviderKind::Census)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_cooldown_seconds)
    }
}

/// Geocoding enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Whether missing geographic fields are looked up. Defaults to `true`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Providers in fallback order. Defaults to arcgis, nominatim, census.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    /// Lifetime of cached provider results in seconds. Defaults to `86400`.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    /// Entry cap for the in-process store. Defaults to `10000`.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// `User-Agent` sent to providers that require identification.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new("arcgis", ProviderKind::ArcGis),
        ProviderConfig::new("nominatim", ProviderKind::Nominatim),
        ProviderConfig::new("census", ProviderKind::Census),
    ]
}

fn default_cache_ttl_seconds() -> u64 {
    86_400
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_user_agent() -> String {
    concat!("locus-validator/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Queue names and worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue the merge stage consumes. Defaults to `"merge"`.
    #[serde(default = "default_merge_queue")]
    pub merge_queue_name: String,

    /// Queue extraction results arrive on. Defaults to `"extraction"`.
    #[serde(default = "default_extraction_queue")]
    pub extraction_queue_name: String,

    /// Number of independent workers. Defaults to `4`.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Idle poll interval in milliseconds. Defaults to `500`.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// `SQLite` URL for the durable job queue. Absent ⇒ in-process queue.
    #[serde(default)]
    pub database_url: Option<String>,
}

fn default_merge_queue() -> String {
    "merge".to_string()
}

fn default_extraction_queue() -> String {
    "extraction".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// Shared state store for circuit breakers, the result cache and persisted validation fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `SQLite` URL shared by all workers. Absent ⇒ in-process store.
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the global recorder is installed. Defaults to `true`.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Root application configuration containing all subsystem settings.
///
/// Loaded with the `LOCUS` prefix for environment overrides using `__` as a separator.
///
/// # Example
///
/// ```toml
/// environment = "production"
///
/// [validator]
/// rejection_threshold = 20
/// job_timeout_seconds = 300
///
/// [store]
/// database_url = "sqlite://./db/locus.db"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment (e.g., "development", "production"). Defaults to `"development"`.
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub validator: ValidatorConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_name: default_validator_queue(),
            result_ttl_seconds: default_result_ttl_seconds(),
            only_validate_schema: false,
            schema_family: default_schema_family(),
            rejection_threshold: default_rejection_threshold(),
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay_seconds(),
            batch_size: default_batch_size(),
            job_timeout_seconds: default_job_timeout_seconds(),
            location_concurrency: default_location_concurrency(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            providers: default_providers(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            cache_max_entries: default_cache_max_entries(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            merge_queue_name: default_merge_queue(),
            extraction_queue_name: default_extraction_queue(),
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            database_url: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            validator: ValidatorConfig::default(),
            enrichment: EnrichmentConfig::default(),
            queue: QueueConfig::default(),
            store: StoreConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Environment variables with the `LOCUS__` prefix can override any configuration value.
    /// Use `__` as a separator for nested fields (e.g., `LOCUS__VALIDATOR__ENABLED=false`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("environment", "development")?
            .set_default("validator.enabled", true)?
            .set_default("validator.queue_name", "validator")?
            .set_default("validator.result_ttl_seconds", 3600)?
            .set_default("validator.rejection_threshold", 10)?
            .set_default("validator.max_retries", 3)?
            .set_default("validator.retry_delay_seconds", 1)?
            .set_default("validator.batch_size", 100)?
            .set_default("validator.job_timeout_seconds", 600)?
            .set_default("enrichment.enabled", true)?
            .set_default("enrichment.cache_ttl_seconds", 86_400)?
            .set_default("enrichment.cache_max_entries", 10_000)?
            .set_default("queue.merge_queue_name", "merge")?
            .set_default("queue.extraction_queue_name", "extraction")?
            .set_default("queue.workers", 4)?
            .set_default("metrics.enabled", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("LOCUS").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml` with fallback to defaults.
    ///
    /// The config file path can be overridden using the `LOCUS_CONFIG` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("LOCUS_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the per-job timeout as a [`Duration`].
    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.validator.job_timeout_seconds)
    }

    /// Returns the base retry delay as a [`Duration`].
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.validator.retry_delay_seconds)
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.enrichment.cache_ttl_seconds)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue.poll_interval_ms)
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// Checks include:
    /// - At least one provider is configured when enrichment is enabled
    /// - Provider names are unique and base URLs are `http(s)`
    /// - The rejection threshold is within `0..=100`
    /// - All counts, timeouts and TTLs are greater than zero
    /// - Logging format is either `"json"` or `"pretty"`
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.enrichment.enabled && self.enrichment.providers.is_empty() {
            return Err("Enrichment is enabled but no geocoding providers are configured".to_string());
        }

        let mut seen = HashSet::new();
        for provider in &self.enrichment.providers {
            if provider.name.trim().is_empty() {
                return Err("Geocoding provider name cannot be empty".to_string());
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(format!("Duplicate geocoding provider: {}", provider.name));
            }
            if let Some(ref url) = provider.base_url {
                if !url.starts_with("http") {
                    return Err(format!("Invalid base URL for provider {}: {}", provider.name, url));
                }
            }
            if provider.timeout_seconds == 0 {
                return Err(format!("Timeout for provider {} must be greater than 0", provider.name));
            }
            if provider.circuit_breaker_threshold == 0 {
                return Err(format!(
                    "Circuit breaker threshold for provider {} must be greater than 0",
                    provider.name
                ));
            }
            if provider.max_concurrent_requests == 0 {
                return Err(format!(
                    "Max concurrent requests for provider {} must be greater than 0",
                    provider.name
                ));
            }
        }

        if self.validator.rejection_threshold > 100 {
            return Err("Rejection threshold must be between 0 and 100".to_string());
        }

        if self.validator.max_retries == 0 {
            return Err("Max retries must be greater than 0".to_string());
        }

        if self.validator.batch_size == 0 {
            return Err("Batch size must be greater than 0".to_string());
        }

        if self.validator.job_timeout_seconds == 0 {
            return Err("Job timeout must be greater than 0".to_string());
        }

        if self.validator.result_ttl_seconds == 0 {
            return Err("Result TTL must be greater than 0".to_string());
        }

        if self.validator.location_concurrency == 0 {
            return Err("Location concurrency must be greater than 0".to_string());
        }

        if self.enrichment.cache_ttl_seconds == 0 {
            return Err("Cache TTL must be greater than 0".to_string());
        }

        if self.queue.workers == 0 {
            return Err("Worker count must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
