//! Geocoding enrichment.
//!
//! - [`GeocodeProvider`]: one external service ([`ArcGisProvider`], [`NominatimProvider`],
//!   [`CensusProvider`]) over the shared [`HttpClient`]
//! - [`CircuitBreaker`]: per-provider failure state in the shared store
//! - [`GeocodeCache`]: per-provider result cache in the shared store
//! - [`GeocodingEnricher`]: the fallback chain tying them together

pub mod arcgis;
pub mod cache;
pub mod census;
pub mod circuit_breaker;
pub mod enricher;
pub mod errors;
pub mod http_client;
pub mod nominatim;
pub mod provider;

pub use arcgis::ArcGisProvider;
pub use cache::{normalize_address, Cached, GeocodeCache, CACHE_KEY_PREFIX};
pub use census::CensusProvider;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use enricher::{EnricherSettings, EnrichmentOutcome, GeocodingEnricher, ProviderSlot};
pub use errors::{EnrichmentError, ProviderError};
pub use http_client::HttpClient;
pub use nominatim::NominatimProvider;
pub use provider::{GeocodeMatch, GeocodeProvider};

use crate::config::{ProviderConfig, ProviderKind};
use std::sync::Arc;

/// Creates the client for a configured provider.
#[must_use]
pub fn build_provider(config: &ProviderConfig, http: Arc<HttpClient>) -> Arc<dyn GeocodeProvider> {
    let low_resolution = config.is_low_resolution();

    match config.kind {
        ProviderKind::ArcGis => Arc::new(
            ArcGisProvider::new(
                &config.name,
                config.base_url.clone(),
                config.api_key.clone(),
                config.timeout(),
                http,
            )
            .with_low_resolution(low_resolution),
        ),
        ProviderKind::Nominatim => Arc::new(
            NominatimProvider::new(&config.name, config.base_url.clone(), config.timeout(), http)
                .with_low_resolution(low_resolution),
        ),
        ProviderKind::Census => Arc::new(
            CensusProvider::new(&config.name, config.base_url.clone(), config.timeout(), http)
                .with_low_resolution(low_resolution),
        ),
    }
}
