//! HTTP-level tests for the geocoding provider clients.
//!
//! Each test points a real client at a local mockito server and checks how the service's
//! response format maps onto matches, addresses and the provider error taxonomy.

use crate::mock_infrastructure::GeocoderMockServer;
use locus_core::geocoding::{
    ArcGisProvider, CensusProvider, GeocodeProvider, HttpClient, NominatimProvider, ProviderError,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUERY: &str = "1 Main St, Springfield, IL 62701";

fn http() -> Arc<HttpClient> {
    Arc::new(HttpClient::new(4, "locus-tests/0.1").expect("http client"))
}

fn arcgis(mock: &GeocoderMockServer) -> ArcGisProvider {
    ArcGisProvider::new("arcgis", Some(mock.url()), Some("token".into()), TIMEOUT, http())
}

fn nominatim(mock: &GeocoderMockServer) -> NominatimProvider {
    NominatimProvider::new("nominatim", Some(mock.url()), TIMEOUT, http())
}

fn census(mock: &GeocoderMockServer) -> CensusProvider {
    CensusProvider::new("census", Some(mock.url()), TIMEOUT, http())
}

#[tokio::test]
async fn test_arcgis_forward_match() {
    let mut mock = GeocoderMockServer::new().await;
    mock.mock_arcgis_candidate(39.78, -89.65, 98.5, "PointAddress").await;

    let found = arcgis(&mock).geocode(QUERY).await.unwrap().expect("match");

    assert!((found.latitude - 39.78).abs() < 1e-9);
    assert!((found.longitude + 89.65).abs() < 1e-9);
    assert!(!found.centroid);
}

#[tokio::test]
async fn test_arcgis_low_score_is_empty_and_postal_match_is_centroid() {
    let mut low = GeocoderMockServer::new().await;
    low.mock_arcgis_candidate(39.78, -89.65, 42.0, "StreetName").await;
    assert_eq!(arcgis(&low).geocode(QUERY).await.unwrap(), None);

    let mut postal = GeocoderMockServer::new().await;
    postal.mock_arcgis_candidate(39.80, -89.64, 100.0, "Postal").await;
    let found = arcgis(&postal).geocode(QUERY).await.unwrap().expect("match");
    assert!(found.centroid);
}

#[tokio::test]
async fn test_arcgis_embedded_errors() {
    let mut mock = GeocoderMockServer::new().await;
    mock.mock_arcgis_embedded_error("/findAddressCandidates", 500, "Unable to complete operation.")
        .await;
    mock.mock_arcgis_embedded_error("/reverseGeocode", 400, "Cannot perform query.").await;
    let provider = arcgis(&mock);

    let error = provider.geocode(QUERY).await.unwrap_err();
    assert!(matches!(error, ProviderError::HttpError(500, _)));
    assert!(error.is_transient());

    assert_eq!(provider.reverse(39.78, -89.65).await.unwrap(), None);
}

#[tokio::test]
async fn test_arcgis_reverse_address() {
    let mut mock = GeocoderMockServer::new().await;
    mock.mock_arcgis_reverse(&json!({
        "Address": "1 Main St",
        "City": "Springfield",
        "Region": "Illinois",
        "Postal": "62701",
        "CountryCode": "USA"
    }))
    .await;

    let address = arcgis(&mock).reverse(39.78, -89.65).await.unwrap().expect("address");

    assert_eq!(address.address_1.as_deref(), Some("1 Main St"));
    assert_eq!(address.city.as_deref(), Some("Springfield"));
    assert_eq!(address.state_province.as_deref(), Some("Illinois"));
    assert_eq!(address.postal_code.as_deref(), Some("62701"));
}

#[tokio::test]
async fn test_nominatim_forward_parses_string_coordinates() {
    let mut mock = GeocoderMockServer::new().await;
    mock.mock_nominatim_search(Some(("39.7817", "-89.6501", "building"))).await;

    let found = nominatim(&mock).geocode(QUERY).await.unwrap().expect("match");

    assert!((found.latitude - 39.7817).abs() < 1e-9);
    assert!((found.longitude + 89.6501).abs() < 1e-9);
    assert!(!found.centroid);
}

#[tokio::test]
async fn test_nominatim_forward_empty_and_centroid() {
    let mut empty = GeocoderMockServer::new().await;
    empty.mock_nominatim_search(None).await;
    assert_eq!(nominatim(&empty).geocode(QUERY).await.unwrap(), None);

    let mut postcode = GeocoderMockServer::new().await;
    postcode.mock_nominatim_search(Some(("39.80", "-89.64", "postcode"))).await;
    let found = nominatim(&postcode).geocode(QUERY).await.unwrap().expect("match");
    assert!(found.centroid);
}

#[tokio::test]
async fn test_nominatim_reverse() {
    let mut mock = GeocoderMockServer::new().await;
    mock.mock_nominatim_reverse(&json!({
        "house_number": "1",
        "road": "Main Street",
        "town": "Springfield",
        "state": "Illinois",
        "postcode": "62701",
        "country_code": "us"
    }))
    .await;

    let address = nominatim(&mock).reverse(39.78, -89.65).await.unwrap().expect("address");

    assert_eq!(address.address_1.as_deref(), Some("1 Main Street"));
    assert_eq!(address.city.as_deref(), Some("Springfield"));
    assert_eq!(address.postal_code.as_deref(), Some("62701"));
    assert_eq!(address.country.as_deref(), Some("US"));

    let mut missing = GeocoderMockServer::new().await;
    missing.mock_nominatim_reverse_not_found().await;
    assert_eq!(nominatim(&missing).reverse(0.0, 0.0).await.unwrap(), None);
}

#[tokio::test]
async fn test_census_forward_and_reverse() {
    let mut mock = GeocoderMockServer::new().await;
    mock.mock_census_match(Some((39.7817, -89.6501))).await;
    let provider = census(&mock);

    let found = provider.geocode(QUERY).await.unwrap().expect("match");
    assert!((found.latitude - 39.7817).abs() < 1e-9);
    assert!(provider.is_low_resolution());

    // No reverse service: answers empty without a request.
    assert_eq!(provider.reverse(39.78, -89.65).await.unwrap(), None);

    let mut none = GeocoderMockServer::new().await;
    none.mock_census_match(None).await;
    assert_eq!(census(&none).geocode(QUERY).await.unwrap(), None);
}

#[tokio::test]
async fn test_http_status_and_body_errors() {
    let mut mock = GeocoderMockServer::new().await;
    mock.mock_status("/search", 503).await;
    mock.mock_status("/reverse", 404).await;
    let provider = nominatim(&mock);

    let unavailable = provider.geocode(QUERY).await.unwrap_err();
    assert!(matches!(unavailable, ProviderError::HttpError(503, _)));
    assert!(unavailable.is_transient());

    let not_found = provider.reverse(39.78, -89.65).await.unwrap_err();
    assert!(matches!(not_found, ProviderError::HttpError(404, _)));
    assert!(!not_found.is_transient());

    let mut malformed = GeocoderMockServer::new().await;
    malformed.mock_malformed("/geocoder/locations/onelineaddress").await;
    let error = census(&malformed).geocode(QUERY).await.unwrap_err();
    assert!(matches!(error, ProviderError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_empty_query_is_rejected_without_request() {
    let mock = GeocoderMockServer::new().await;

    let error = nominatim(&mock).geocode("   ").await.unwrap_err();

    assert!(matches!(error, ProviderError::InvalidRequest(_)));
    assert!(!error.is_transient());
}

#[tokio::test]
async fn test_unreachable_provider_is_transient() {
    let provider = NominatimProvider::new(
        "nominatim",
        Some("http://127.0.0.1:9".into()),
        Duration::from_secs(2),
        http(),
    );

    let error = provider.geocode(QUERY).await.unwrap_err();

    assert!(error.is_transient());
}
