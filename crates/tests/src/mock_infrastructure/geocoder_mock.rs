//! Geocoder Mock Server
//!
//! Wraps mockito to serve responses in the formats of the supported geocoding services.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};

/// Mock HTTP server speaking the ArcGIS, Nominatim and Census response formats.
///
/// Pass [`url`](Self::url) as the provider's `base_url`.
pub struct GeocoderMockServer {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl GeocoderMockServer {
    /// Creates a mock server with a fresh mockito instance.
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    /// Returns the URL of the mock server.
    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    async fn mock_json(&mut self, path: &str, query: Matcher, status: usize, body: &Value) -> &mut Self {
        let mock = self
            .server
            .mock("GET", path)
            .match_query(query)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Mocks an ArcGIS `findAddressCandidates` answer with a single candidate.
    pub async fn mock_arcgis_candidate(
        &mut self,
        latitude: f64,
        longitude: f64,
        score: f64,
        addr_type: &str,
    ) -> &mut Self {
        let body = json!({
            "spatialReference": {"wkid": 4326},
            "candidates": [{
                "address": "1 Main St, Springfield, Illinois, 62701",
                "location": {"x": longitude, "y": latitude},
                "score": score,
                "attributes": {"Addr_type": addr_type}
            }]
        });
        self.mock_json(
            "/findAddressCandidates",
            Matcher::AllOf(vec![
                Matcher::UrlEncoded("f".into(), "json".into()),
                Matcher::Regex("SingleLine=".into()),
            ]),
            200,
            &body,
        )
        .await
    }

    /// Mocks an ArcGIS error reported inside an HTTP 200 body.
    pub async fn mock_arcgis_embedded_error(&mut self, path: &str, code: i64, message: &str) -> &mut Self {
        let body = json!({"error": {"code": code, "message": message, "details": []}});
        self.mock_json(path, Matcher::Any, 200, &body).await
    }

    /// Mocks an ArcGIS `reverseGeocode` answer.
    pub async fn mock_arcgis_reverse(&mut self, address: &Value) -> &mut Self {
        let body = json!({
            "address": address,
            "location": {"x": -89.65, "y": 39.78}
        });
        self.mock_json(
            "/reverseGeocode",
            Matcher::UrlEncoded("f".into(), "json".into()),
            200,
            &body,
        )
        .await
    }

    /// Mocks a Nominatim `/search` answer. `None` yields an empty result list.
    pub async fn mock_nominatim_search(&mut self, result: Option<(&str, &str, &str)>) -> &mut Self {
        let body = match result {
            Some((lat, lon, addresstype)) => json!([{
                "place_id": 1,
                "lat": lat,
                "lon": lon,
                "addresstype": addresstype,
                "display_name": "Springfield, Sangamon County, Illinois, United States"
            }]),
            None => json!([]),
        };
        self.mock_json(
            "/search",
            Matcher::AllOf(vec![
                Matcher::UrlEncoded("format".into(), "jsonv2".into()),
                Matcher::UrlEncoded("countrycodes".into(), "us".into()),
            ]),
            200,
            &body,
        )
        .await
    }

    /// Mocks a Nominatim `/reverse` answer with the given `address` object.
    pub async fn mock_nominatim_reverse(&mut self, address: &Value) -> &mut Self {
        let body = json!({"place_id": 1, "lat": "39.78", "lon": "-89.65", "address": address});
        self.mock_json(
            "/reverse",
            Matcher::UrlEncoded("addressdetails".into(), "1".into()),
            200,
            &body,
        )
        .await
    }

    /// Mocks the Nominatim "Unable to geocode" reverse answer.
    pub async fn mock_nominatim_reverse_not_found(&mut self) -> &mut Self {
        self.mock_json("/reverse", Matcher::Any, 200, &json!({"error": "Unable to geocode"})).await
    }

    /// Mocks a Census one-line address answer. `None` yields no address matches.
    pub async fn mock_census_match(&mut self, coordinates: Option<(f64, f64)>) -> &mut Self {
        let matches = match coordinates {
            Some((latitude, longitude)) => json!([{
                "matchedAddress": "1 MAIN ST, SPRINGFIELD, IL, 62701",
                "coordinates": {"x": longitude, "y": latitude}
            }]),
            None => json!([]),
        };
        let body = json!({"result": {"input": {}, "addressMatches": matches}});
        self.mock_json(
            "/geocoder/locations/onelineaddress",
            Matcher::AllOf(vec![
                Matcher::UrlEncoded("benchmark".into(), "Public_AR_Current".into()),
                Matcher::UrlEncoded("format".into(), "json".into()),
            ]),
            200,
            &body,
        )
        .await
    }

    /// Mocks a non-success status with a plain-text body.
    pub async fn mock_status(&mut self, path: &str, status: usize) -> &mut Self {
        let mock = self
            .server
            .mock("GET", path)
            .match_query(Matcher::Any)
            .with_status(status)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Mocks a success status with a body that is not JSON.
    pub async fn mock_malformed(&mut self, path: &str) -> &mut Self {
        let mock = self
            .server
            .mock("GET", path)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }
}
