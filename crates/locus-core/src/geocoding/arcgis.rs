use super::{
    errors::ProviderError,
    http_client::HttpClient,
    provider::{clean, GeocodeMatch, GeocodeProvider},
};
use crate::types::PostalAddress;
use async_trait::async_trait;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use url::Url;

pub const DEFAULT_ARCGIS_URL: &str =
    "https://geocode.arcgis.com/arcgis/rest/services/World/GeocodeServer";

/// Match types that resolve to an area rather than a building.
const CENTROID_ADDR_TYPES: &[&str] = &["Postal", "PostalLoc", "PostalExt", "Locality", "Zone"];

#[derive(Debug, Deserialize)]
struct CandidatesResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ArcGisError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    location: Location,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    attributes: CandidateAttributes,
}

#[derive(Debug, Deserialize)]
struct Location {
    x: f64,
    y: f64,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateAttributes {
    #[serde(rename = "Addr_type", default)]
    addr_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: Option<ReverseAddress>,
    #[serde(default)]
    error: Option<ArcGisError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReverseAddress {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    postal: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArcGisError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// ArcGIS World Geocoding Service client.
///
/// ArcGIS reports some failures as HTTP 200 with an `error` object; those are mapped onto
/// [`ProviderError::HttpError`] using the embedded code so that 5xx-class errors stay
/// transient. Reverse lookups answering "no address found" (code 400) are empty results.
pub struct ArcGisProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    low_resolution: bool,
    min_score: f64,
    timeout: Duration,
    http: Arc<HttpClient>,
}

impl ArcGisProvider {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        base_url: Option<String>,
        api_key: Option<String>,
        timeout: Duration,
        http: Arc<HttpClient>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_ARCGIS_URL.to_string()),
            api_key,
            low_resolution: false,
            min_score: 80.0,
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

    fn embedded_error(error: ArcGisError) -> ProviderError {
        let status = u16::try_from(error.code).unwrap_or(500);
        ProviderError::HttpError(status, error.message)
    }
}

#[async_trait]
impl GeocodeProvider for ArcGisProvider {
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

        let mut url = self.endpoint("findAddressCandidates")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("SingleLine", query)
                .append_pair("f", "json")
                .append_pair("outFields", "Addr_type")
                .append_pair("maxLocations", "1");
            if let Some(ref token) = self.api_key {
                pairs.append_pair("token", token);
            }
        }

        let response: CandidatesResponse = self.http.get_json(url, self.timeout).await?;
        if let Some(error) = response.error {
            return Err(Self::embedded_error(error));
        }

        let best = response
            .candidates
            .into_iter()
            .filter(|c| c.score >= self.min_score)
            .max_by(|a, b| a.score.total_cmp(&b.score));

        Ok(best.map(|c| {
            let centroid = c
                .attributes
                .addr_type
                .as_deref()
                .is_some_and(|t| CENTROID_ADDR_TYPES.contains(&t));
            GeocodeMatch { latitude: c.location.y, longitude: c.location.x, centroid }
        }))
    }

    async fn reverse(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<PostalAddress>, ProviderError> {
        let mut url = self.endpoint("reverseGeocode")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("location", &format!("{longitude},{latitude}")).append_pair("f", "json");
            if let Some(ref token) = self.api_key {
                pairs.append_pair("token", token);
            }
        }

        let response: ReverseResponse = self.http.get_json(url, self.timeout).await?;
        if let Some(error) = response.error {
            if error.code == 400 {
                return Ok(None);
            }
            return Err(Self::embedded_error(error));
        }

        let address = response.address.map(|a| PostalAddress {
            address_1: clean(a.address),
            city: clean(a.city),
            state_province: clean(a.region),
            postal_code: clean(a.postal),
            country: clean(a.country_code),
            ..PostalAddress::default()
        });

        Ok(address.filter(|a| !a.is_empty()))
    }
}
