use crate::store::StoreError;
use thiserror::Error;

/// Errors from a single geocoding provider call.
///
/// These never leave the enricher: transient ones are retried, and every failure ends with
/// failover to the next provider in the chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProviderError {
    /// Call exceeded the per-call timeout.
    #[error("Request timeout")]
    Timeout,

    /// Failed to reach the provider.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Non-2xx HTTP status. Second field is a truncated response body.
    #[error("HTTP error: {0}")]
    HttpError(u16, String),

    /// The response could not be decoded or lacks required fields.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The query could not be turned into a request (e.g. empty address).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Provider was skipped because its circuit breaker is open.
    #[error("Circuit breaker is open")]
    CircuitOpen,
}

impl ProviderError {
    /// Returns `true` if retrying the same provider may succeed.
    ///
    /// Transient errors include:
    /// - Timeouts
    /// - Connection failures
    /// - HTTP 5xx server errors
    /// - HTTP 429 rate limiting
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionFailed(_) => true,
            Self::HttpError(status, _) => (500..=599).contains(status) || *status == 429,
            _ => false,
        }
    }

    /// Returns a static string for log fields and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::HttpError(..) => "http_error",
            Self::InvalidResponse(_) => "invalid_response",
            Self::InvalidRequest(_) => "invalid_request",
            Self::CircuitOpen => "circuit_open",
        }
    }
}

/// Enrichment failures recorded on the job result. None of these abort processing.
#[derive(Error, Debug)]
pub enum EnrichmentError {
    /// Every provider in the chain failed, was skipped, or returned nothing.
    #[error("all geocoding providers exhausted for location {location} ({action})")]
    AllProvidersExhausted { location: usize, action: &'static str },

    /// The shared state store failed in a way that prevented enrichment.
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
}
