use super::{
    errors::ProviderError,
    http_client::HttpClient,
    provider::{GeocodeMatch, GeocodeProvider},
};
use crate::types::PostalAddress;
use async_trait::async_trait;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use url::Url;

pub const DEFAULT_CENSUS_URL: &str = "https://geocoding.geo.census.gov";

#[derive(Debug, Deserialize)]
struct CensusResponse {
    result: CensusResult,
}

#[derive(Debug, Deserialize)]
struct CensusResult {
    #[serde(rename = "addressMatches", default)]
    address_matches: Vec<AddressMatch>,
}

#[derive(Debug, Deserialize)]
struct AddressMatch {
    coordinates: Coordinates,
}

#[derive(Debug, Deserialize)]
struct Coordinates {
    x: f64,
    y: f64,
}

/// US Census Bureau one-line address geocoder.
///
/// Matches are interpolated along address ranges, so the provider is low resolution by default.
/// The service has no reverse geocoding; [`reverse`](GeocodeProvider::reverse) always answers
/// empty so the chain moves on without a network call.
pub struct CensusProvider {
    name: String,
    base_url: String,
    benchmark: String,
    low_resolution: bool,
    timeout: Duration,
    http: Arc<HttpClient>,
}

impl CensusProvider {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        base_url: Option<String>,
        timeout: Duration,
        http: Arc<HttpClient>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_CENSUS_URL.to_string()),
            benchmark: "Public_AR_Current".to_string(),
            low_resolution: true,
            timeout,
            http,
        }
    }

    #[must_use]
    pub fn with_low_resolution(mut self, low_resolution: bool) -> Self {
        self.low_resolution = low_resolution;
        self
    }
}

#[async_trait]
impl GeocodeProvider for CensusProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_low_resolution(&self) -> bool {
        self.low_resolution
    }

    async fn geocode(&self, query: &str) -> Result<Option<GeocodeMatch>, ProviderError> {
        if query.trim().is_empty() {
            return Err(ProviderError::InvalidRequest("empty address".to_string()));
        }

        let mut url = Url::parse(&format!(
            "{}/geocoder/locations/onelineaddress",
            self.base_url.trim_end_matches('/')
        ))
        .map_err(|e| ProviderError::InvalidRequest(format!("invalid base url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("address", query)
            .append_pair("benchmark", &self.benchmark)
            .append_pair("format", "json");

        let response: CensusResponse = self.http.get_json(url, self.timeout).await?;

        Ok(response
            .result
            .address_matches
            .into_iter()
            .next()
            .map(|m| GeocodeMatch::new(m.coordinates.y, m.coordinates.x)))
    }

    async fn reverse(
        &self,
        _latitude: f64,
        _longitude: f64,
    ) -> Result<Option<PostalAddress>, ProviderError> {
        Ok(None)
    }
}
