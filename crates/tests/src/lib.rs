//! Integration Tests for the Locus Validation Stage
//!
//! This crate contains various test modules:
//!
//! - `provider_client_tests`: HTTP-level tests of the ArcGIS, Nominatim and Census clients
//! - `enrichment_tests`: Fallback order, retry, circuit breaker and cache behavior of the chain
//! - `validation_flow_tests`: Scoring, rejection statistics and forwarding of whole jobs
//! - `runtime_tests`: Runtime wiring over `SQLite` backends and shared breaker state
//! - `metrics_tests`: Prometheus exposition of the validation counters
//! - `mock_infrastructure`: Reusable mock types for testing (scripted providers, HTTP mocks)
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```
//!
//! No external services are needed: providers are either scripted in-process or served by
//! a local mockito server, and `SQLite` databases live in memory or in the temp directory.

#[cfg(test)]
mod provider_client_tests;

#[cfg(test)]
mod enrichment_tests;

#[cfg(test)]
mod validation_flow_tests;

#[cfg(test)]
mod runtime_tests;

#[cfg(test)]
mod metrics_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
