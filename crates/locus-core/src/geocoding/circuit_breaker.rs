use crate::{
    metrics::MetricsCollector,
    store::{now_millis, StateStore, StoreError},
};
use chrono::{DateTime, TimeZone, Utc};
use std::{sync::Arc, time::Duration};

/// Circuit breaker state for one provider.
///
/// Transitions:
/// - `Closed` -> `Open`: when consecutive failures reach the threshold
/// - `Open` -> probing: when the cooldown expires the provider is called again; the failure
///   count is kept, so one more failure reopens the circuit immediately
/// - any -> `Closed { failure_count: 0 }`: on a successful call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls are allowed.
    Closed { failure_count: u32 },
    /// Calls are skipped until `cooldown_until`.
    Open { cooldown_until: DateTime<Utc> },
}

impl CircuitState {
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Per-provider circuit breaker whose state lives in a shared [`StateStore`].
///
/// Two keys per provider:
/// - `breaker:{provider}:failures`: consecutive failure count, updated with atomic increment
/// - `breaker:{provider}:open_until`: unix millis the cooldown ends; written with
///   compare-and-set so exactly one worker performs the open transition, and stored with the
///   cooldown as TTL so it disappears on its own
///
/// No lock is held across provider calls; every method is a short sequence of single-key
/// atomic store operations.
pub struct CircuitBreaker {
    provider: String,
    store: Arc<dyn StateStore>,
    metrics: Arc<MetricsCollector>,
    /// Number of consecutive failures before opening the circuit.
    threshold: u32,
    /// Time the circuit stays open.
    cooldown: Duration,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        store: Arc<dyn StateStore>,
        metrics: Arc<MetricsCollector>,
        threshold: u32,
        cooldown: Duration,
    ) -> Self {
        Self { provider: provider.into(), store, metrics, threshold: threshold.max(1), cooldown }
    }

    fn failures_key(&self) -> String {
        format!("breaker:{}:failures", self.provider)
    }

    fn open_key(&self) -> String {
        format!("breaker:{}:open_until", self.provider)
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Reads the current state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the shared store is unavailable.
    pub async fn state(&self) -> Result<CircuitState, StoreError> {
        if let Some(until) = self.open_until().await? {
            if until > now_millis() {
                return Ok(CircuitState::Open { cooldown_until: millis_to_datetime(until) });
            }
        }

        let failure_count = self
            .store
            .get(&self.failures_key())
            .await?
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);

        Ok(CircuitState::Closed { failure_count })
    }

    /// Returns `true` unless the circuit is open and its cooldown has not expired.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the shared store is unavailable.
    pub async fn allow_call(&self) -> Result<bool, StoreError> {
        match self.open_until().await? {
            Some(until) => Ok(until <= now_millis()),
            None => Ok(true),
        }
    }

    /// Records a successful (or definitively empty) call, closing the circuit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the shared store is unavailable.
    pub async fn record_success(&self) -> Result<(), StoreError> {
        self.store.set(&self.failures_key(), "0", None).await?;
        if self.store.delete(&self.open_key()).await? {
            tracing::info!(provider = %self.provider, "circuit breaker closed after successful call");
        }
        Ok(())
    }

    /// Records a call that failed after exhausting retries.
    ///
    /// Returns the state after the failure. When the threshold is reached, only the worker
    /// whose compare-and-set creates the `open_until` key logs and counts the transition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the shared store is unavailable.
    pub async fn record_failure(&self) -> Result<CircuitState, StoreError> {
        let count = self.store.increment(&self.failures_key(), None).await?;
        let failure_count = u32::try_from(count).unwrap_or(u32::MAX);

        if failure_count < self.threshold {
            return Ok(CircuitState::Closed { failure_count });
        }

        let cooldown_ms = i64::try_from(self.cooldown.as_millis()).unwrap_or(i64::MAX);
        let until = now_millis().saturating_add(cooldown_ms);
        let opened = self
            .store
            .compare_and_set(&self.open_key(), None, Some(&until.to_string()), Some(self.cooldown))
            .await?;

        if opened {
            tracing::warn!(
                provider = %self.provider,
                failure_count,
                threshold = self.threshold,
                cooldown_secs = self.cooldown.as_secs(),
                "circuit breaker opened after reaching failure threshold"
            );
            self.metrics.record_circuit_opened(&self.provider).await;
            return Ok(CircuitState::Open { cooldown_until: millis_to_datetime(until) });
        }

        // Another worker opened it first, or it is still open from an earlier transition.
        match self.open_until().await? {
            Some(existing) => Ok(CircuitState::Open { cooldown_until: millis_to_datetime(existing) }),
            None => Ok(CircuitState::Closed { failure_count }),
        }
    }

    async fn open_until(&self) -> Result<Option<i64>, StoreError> {
        Ok(self.store.get(&self.open_key()).await?.and_then(|v| v.parse::<i64>().ok()))
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}
