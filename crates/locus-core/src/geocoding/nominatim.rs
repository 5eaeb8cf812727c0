use super::{
    errors::ProviderError,
    http_client::HttpClient,
    provider::{clean, parse_coordinate, GeocodeMatch, GeocodeProvider},
};
use crate::types::PostalAddress;
use async_trait::async_trait;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use url::Url;

pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

/// Result types that describe an area rather than a building.
const CENTROID_ADDRESS_TYPES: &[&str] =
    &["postcode", "city", "town", "village", "hamlet", "county", "state", "suburb"];

#[derive(Debug, Deserialize)]
struct SearchResult {
    lat: String,
    lon: String,
    #[serde(default)]
    addresstype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReverseResult {
    #[serde(default)]
    address: Option<NominatimAddress>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    #[serde(default)]
    house_number: Option<String>,
    #[serde(default)]
    road: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    town: Option<String>,
    #[serde(default)]
    village: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    postcode: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
}

impl NominatimAddress {
    fn into_postal(self) -> PostalAddress {
        let street = match (clean(self.house_number), clean(self.road)) {
            (Some(number), Some(road)) => Some(format!("{number} {road}")),
            (None, road) => road,
            (Some(_), None) => None,
        };

        PostalAddress {
            address_1: street,
            city: clean(self.city).or_else(|| clean(self.town)).or_else(|| clean(self.village)),
            state_province: clean(self.state),
            postal_code: clean(self.postcode),
            country: clean(self.country_code).map(|c| c.to_uppercase()),
            ..PostalAddress::default()
        }
    }
}

/// OpenStreetMap Nominatim client (`/search` and `/reverse`, `jsonv2` format).
///
/// Nominatim's usage policy requires an identifying `User-Agent`; it is set on the shared
/// [`HttpClient`].
pub struct NominatimProvider {
    name: String,
    base_url: String,
    country_codes: Option<String>,
    low_resolution: bool,
    timeout: Duration,
    http: Arc<HttpClient>,
}

impl NominatimProvider {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        base_url: Option<String>,
        timeout: Duration,
        http: Arc<HttpClient>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_NOMINATIM_URL.to_string()),
            country_codes: Some("us".to_string()),
            low_resolution: false,
            timeout,
            http,
        }
    }

    #[must_use]
    pub fn with_low_resolution(mut self, low_resolution: bool) -> Self {
        self.low_resolution = low_resolution;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        Url::parse(&format!("{}/{path}", self.base_url.trim_end_matches('/')))
            .map_err(|e| ProviderError::InvalidRequest(format!("invalid base url: {e}")))
    }
}

#[async_trait]
impl GeocodeProvider for NominatimProvider {
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

        let mut url = self.endpoint("search")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query).append_pair("format", "jsonv2").append_pair("limit", "1");
            if let Some(ref codes) = self.country_codes {
                pairs.append_pair("countrycodes", codes);
            }
        }

        let results: Vec<SearchResult> = self.http.get_json(url, self.timeout).await?;
        let Some(first) = results.into_iter().next() else {
            return Ok(None);
        };

        let centroid = first
            .addresstype
            .as_deref()
            .is_some_and(|t| CENTROID_ADDRESS_TYPES.contains(&t));

        Ok(Some(GeocodeMatch {
            latitude: parse_coordinate(&first.lat)?,
            longitude: parse_coordinate(&first.lon)?,
            centroid,
        }))
    }

    async fn reverse(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<PostalAddress>, ProviderError> {
        let mut url = self.endpoint("reverse")?;
        url.query_pairs_mut()
            .append_pair("lat", &latitude.to_string())
            .append_pair("lon", &longitude.to_string())
            .append_pair("format", "jsonv2")
            .append_pair("addressdetails", "1");

        let result: ReverseResult = self.http.get_json(url, self.timeout).await?;
        if result.error.is_some() {
            return Ok(None);
        }

        Ok(result.address.map(NominatimAddress::into_postal).filter(|a| !a.is_empty()))
    }
}
