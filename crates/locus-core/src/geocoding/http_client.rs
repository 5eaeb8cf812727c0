use super::errors::ProviderError;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use url::Url;

/// Maximum response body characters kept in [`ProviderError::HttpError`].
const MAX_ERROR_BODY: usize = 256;

/// HTTP client shared by the provider clients of one process.
///
/// Concurrency is bounded by a semaphore, and every request carries an explicit timeout.
/// Retries are not performed here; the enricher owns the retry policy so that it is applied
/// the same way to every provider.
pub struct HttpClient {
    client: Client,
    concurrent_limit: Arc<Semaphore>,
    permit_timeout: Duration,
}

impl HttpClient {
    /// Creates a client allowing `concurrent_limit` in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ConnectionFailed`] if the underlying reqwest client fails to
    /// build.
    pub fn new(concurrent_limit: usize, user_agent: &str) -> Result<Self, ProviderError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(16)
            .connect_timeout(Duration::from_secs(5))
            .use_rustls_tls()
            .user_agent(user_agent)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                ProviderError::ConnectionFailed(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            concurrent_limit: Arc::new(Semaphore::new(concurrent_limit.max(1))),
            permit_timeout: Duration::from_secs(5),
        })
    }

    /// Maps reqwest failures onto the provider error taxonomy without leaking URLs or keys.
    fn classify_error(error: &reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout
        } else if error.is_connect() {
            ProviderError::ConnectionFailed("connection refused or unreachable".to_string())
        } else if error.is_decode() {
            ProviderError::InvalidResponse("response decode error".to_string())
        } else if error.is_body() {
            ProviderError::ConnectionFailed("response body error".to_string())
        } else {
            ProviderError::ConnectionFailed("request failed".to_string())
        }
    }

    /// Sends a GET request and decodes the JSON body.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::Timeout`] if permit acquisition or the request times out
    /// - [`ProviderError::HttpError`] for non-success HTTP status codes
    /// - [`ProviderError::InvalidResponse`] if the body is not the expected JSON
    /// - [`ProviderError::ConnectionFailed`] for other network failures
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        timeout: Duration,
    ) -> Result<T, ProviderError> {
        let _permit = tokio::time::timeout(
            self.permit_timeout,
            Arc::clone(&self.concurrent_limit).acquire_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                host = url.host_str().unwrap_or_default(),
                available_permits = self.concurrent_limit.available_permits(),
                "http client semaphore acquisition timeout"
            );
            ProviderError::Timeout
        })?
        .map_err(|_| ProviderError::ConnectionFailed("http client closed".to_string()))?;

        let response = self
            .client
            .get(url)
            .header("accept", "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::classify_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status, response).await);
        }

        let body = response.bytes().await.map_err(|e| Self::classify_error(&e))?;
        serde_json::from_slice(&body)
            .map_err(|e| ProviderError::InvalidResponse(format!("unexpected response body: {e}")))
    }

    async fn status_error(status: StatusCode, response: reqwest::Response) -> ProviderError {
        let raw_text = response.text().await.unwrap_or_default();
        let text = if raw_text.chars().count() > MAX_ERROR_BODY {
            let truncated: String = raw_text.chars().take(MAX_ERROR_BODY).collect();
            format!("{truncated}... (truncated)")
        } else {
            raw_text
        };

        tracing::debug!(status = status.as_u16(), "provider returned error status");
        ProviderError::HttpError(status.as_u16(), text)
    }
}
