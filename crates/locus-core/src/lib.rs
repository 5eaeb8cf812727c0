//! # Locus Core
//!
//! Core library for the Locus validation stage, which sits between language-model
//! extraction and the merge stage of the facility ingestion pipeline.
//!
//! This crate provides the foundational components for:
//!
//! - **[`geocoding`]**: Provider fallback chain over external geocoding services with
//!   per-provider circuit breakers, retry with exponential backoff, and a result cache.
//!
//! - **[`scoring`]**: Rule evaluation (bounds checks, test-data and placeholder detection)
//!   and the deterministic confidence scorer that gates publication.
//!
//! - **[`validation`]**: The orchestrator that parses extraction output, enriches, scores,
//!   persists validation fields and forwards every record to the merge stage.
//!
//! - **[`queue`]**: Job payloads, durable queue backends, and the stage router that decides
//!   whether extraction output flows through validation.
//!
//! - **[`store`]**: Externally shared, atomically updated key/value state used by the
//!   circuit breakers and cache so independent workers observe the same state.
//!
//! - **[`metrics`]**: Prometheus counters plus an internal snapshot of rejection statistics.
//!
//! ## Job Flow
//!
//! ```text
//! Extraction result
//!       │
//!       ▼
//! ┌─────────────┐
//! │ QueueRouter │ ─── validation disabled / schema mismatch ──► merge queue
//! └──────┬──────┘
//!        │ validate
//!        ▼
//! ┌────────────────────┐
//! │ ValidationProcessor│
//! └─────────┬──────────┘
//!           │
//!    ┌──────┴───────┐
//!    ▼              ▼
//! Parse ──► GeocodingEnricher ──► RuleEvaluator ──► ConfidenceScorer
//!                 │
//!        ┌────────┴─────────┐
//!        ▼                  ▼
//!   CircuitBreaker     GeocodeCache
//!   (StateStore)       (StateStore)
//!           │
//!           ▼
//!   Persist validation fields ──► enqueue to merge
//! ```

pub mod config;
pub mod geocoding;
pub mod metrics;
pub mod queue;
pub mod runtime;
pub mod scoring;
pub mod store;
pub mod types;
pub mod validation;
