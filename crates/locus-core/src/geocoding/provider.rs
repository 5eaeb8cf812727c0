use super::errors::ProviderError;
use crate::types::PostalAddress;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Coordinates resolved by a forward lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeocodeMatch {
    pub latitude: f64,
    pub longitude: f64,
    /// The match is a postal-code, city or region centroid rather than a street address.
    #[serde(default)]
    pub centroid: bool,
}

impl GeocodeMatch {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude, centroid: false }
    }

    #[must_use]
    pub fn centroid(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude, centroid: true }
    }
}

/// One external geocoding service.
///
/// `Ok(None)` is a definitive empty answer: the provider worked but has no match. The enricher
/// does not retry it and moves on to the next provider.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    /// Stable identifier used for cache keys, breaker keys and `geocoding_source`.
    fn name(&self) -> &str;

    /// Coarse providers carry a scoring penalty when they supply coordinates.
    fn is_low_resolution(&self) -> bool {
        false
    }

    /// Resolves a one-line address to coordinates.
    async fn geocode(&self, query: &str) -> Result<Option<GeocodeMatch>, ProviderError>;

    /// Resolves coordinates to a postal address.
    async fn reverse(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<PostalAddress>, ProviderError>;
}

/// Parses a coordinate that some providers encode as a JSON string.
pub(crate) fn parse_coordinate(raw: &str) -> Result<f64, ProviderError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ProviderError::InvalidResponse(format!("invalid coordinate: {raw}")))
}

/// Drops blank strings returned by providers.
pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
