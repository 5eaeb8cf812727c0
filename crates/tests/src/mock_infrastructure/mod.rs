//! Mock Infrastructure for Testing the Locus Validation Stage
//!
//! Reusable mocks for exercising the enrichment chain without real geocoding services.
//!
//! ## Components
//!
//! - `ScriptedProvider`: in-process `GeocodeProvider` with scripted answers and call counting
//! - `GeocoderMockServer`: wraps mockito to serve ArcGIS, Nominatim and Census responses
//! - Test helpers for configs, harnesses and record fixtures
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{ScriptedProvider, TestHarness};
//!
//! let a = Arc::new(ScriptedProvider::matching("A", 39.78, -89.65));
//! let harness = TestHarness::with_providers(test_config(), vec![a.clone()]).await;
//! assert_eq!(a.forward_calls(), 0);
//! ```

pub mod geocoder_mock;
pub mod scripted_provider;

pub use geocoder_mock::GeocoderMockServer;
pub use scripted_provider::ScriptedProvider;
pub use test_helpers::*;
