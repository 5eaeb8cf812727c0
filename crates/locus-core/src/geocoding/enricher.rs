//! Provider fallback chain with retry, cache and circuit breaker.
//!
//! # Lookup Selection
//!
//! | Location has | Lookup |
//! |--------------|--------|
//! | address, no coordinates | forward geocode (then postal fill if the postal code is missing) |
//! | coordinates, no address | reverse geocode, adding an address |
//! | coordinates and an address without postal code | reverse geocode filling blank fields |
//! | neither, or everything | nothing |
//!
//! # Per-Provider Procedure
//!
//! 1. Skip the provider if its circuit is open
//! 2. Take the job's permit for the provider so calls to it are serialized within the job
//! 3. Cache hit: use it (an empty entry moves on to the next provider without a call)
//! 4. Call with per-call timeout; transient errors are retried with doubling delay up to
//!    `max_retries` total attempts
//! 5. Success or definitive empty answer closes the breaker and is cached; exhausted failures
//!    count towards opening it
//!
//! Enrichment only fills blanks. A location for which every provider fails is returned
//! unchanged and an [`EnrichmentError::AllProvidersExhausted`] is recorded.

use super::{
    cache::{Cached, GeocodeCache},
    circuit_breaker::CircuitBreaker,
    errors::{EnrichmentError, ProviderError},
    provider::{GeocodeMatch, GeocodeProvider},
};
use crate::{
    metrics::MetricsCollector,
    types::{
        is_blank, AttemptOutcome, CandidateRecord, EnrichmentAction, GeocodingProvenance,
        LocationCandidate, PostalAddress, ProviderAttempt,
    },
};
use futures::stream::{self, StreamExt};
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Retry and fan-out settings for the enricher.
#[derive(Debug, Clone)]
pub struct EnricherSettings {
    /// Total attempts per provider for transient failures.
    pub max_retries: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub retry_delay: Duration,
    /// Locations of one job enriched concurrently.
    pub location_concurrency: usize,
}

impl Default for EnricherSettings {
    fn default() -> Self {
        Self { max_retries: 3, retry_delay: Duration::from_secs(1), location_concurrency: 4 }
    }
}

/// One provider in the fallback chain with its breaker and per-call timeout.
pub struct ProviderSlot {
    provider: Arc<dyn GeocodeProvider>,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl ProviderSlot {
    #[must_use]
    pub fn new(provider: Arc<dyn GeocodeProvider>, breaker: CircuitBreaker, timeout: Duration) -> Self {
        Self { provider, breaker, timeout }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.provider.name()
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

/// Result of enriching one record.
#[derive(Debug)]
pub struct EnrichmentOutcome {
    pub record: CandidateRecord,
    /// Provenance entries per location, indexed like `record.locations`.
    pub provenance: Vec<Vec<GeocodingProvenance>>,
    pub errors: Vec<EnrichmentError>,
}

#[derive(Debug, Clone)]
enum Lookup {
    Forward { query: String },
    Reverse { latitude: f64, longitude: f64, action: EnrichmentAction },
}

impl Lookup {
    fn action(&self) -> EnrichmentAction {
        match self {
            Self::Forward { .. } => EnrichmentAction::Forward,
            Self::Reverse { action, .. } => *action,
        }
    }

    fn cache_label(&self) -> &'static str {
        match self {
            Self::Forward { .. } => "forward",
            Self::Reverse { .. } => "reverse",
        }
    }

    /// Chooses the lookup a location needs, if any.
    fn plan(location: &LocationCandidate) -> Option<Self> {
        match (location.coordinates(), location.primary_address()) {
            (None, Some(address)) => {
                let query = address.one_line();
                (!query.is_empty()).then_some(Self::Forward { query })
            }
            (Some((latitude, longitude)), None) => {
                Some(Self::Reverse { latitude, longitude, action: EnrichmentAction::Reverse })
            }
            (Some((latitude, longitude)), Some(address)) if !address.has_postal_code() => {
                Some(Self::Reverse { latitude, longitude, action: EnrichmentAction::PostalFill })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum LookupValue {
    Coordinates(GeocodeMatch),
    Address(PostalAddress),
}

struct Resolved {
    slot: usize,
    value: LookupValue,
    cache_hit: bool,
}

struct Resolution {
    resolved: Option<Resolved>,
    attempts: Vec<ProviderAttempt>,
    store_errors: Vec<EnrichmentError>,
}

/// Fills missing geographic fields of a record through the provider chain.
pub struct GeocodingEnricher {
    slots: Vec<ProviderSlot>,
    cache: GeocodeCache,
    metrics: Arc<MetricsCollector>,
    settings: EnricherSettings,
}

impl GeocodingEnricher {
    #[must_use]
    pub fn new(
        slots: Vec<ProviderSlot>,
        cache: GeocodeCache,
        metrics: Arc<MetricsCollector>,
        settings: EnricherSettings,
    ) -> Self {
        Self { slots, cache, metrics, settings }
    }

    /// Provider names in fallback order.
    #[must_use]
    pub fn provider_names(&self) -> Vec<&str> {
        self.slots.iter().map(ProviderSlot::name).collect()
    }

    #[must_use]
    pub fn slots(&self) -> &[ProviderSlot] {
        &self.slots
    }

    /// Enriches every location of `record`.
    ///
    /// Locations fan out with bounded concurrency; calls to one provider are serialized for the
    /// duration of this call. Never fails: problems are returned in
    /// [`EnrichmentOutcome::errors`].
    pub async fn enrich(&self, mut record: CandidateRecord) -> EnrichmentOutcome {
        let permits: Vec<Semaphore> = self.slots.iter().map(|_| Semaphore::new(1)).collect();
        let locations = std::mem::take(&mut record.locations);
        let concurrency = self.settings.location_concurrency.max(1);

        let results: Vec<_> = stream::iter(locations.into_iter().enumerate())
            .map(|(index, location)| self.enrich_location(index, location, &permits))
            .buffered(concurrency)
            .collect()
            .await;

        let mut provenance = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for (location, location_provenance, location_errors) in results {
            record.locations.push(location);
            provenance.push(location_provenance);
            errors.extend(location_errors);
        }

        EnrichmentOutcome { record, provenance, errors }
    }

    async fn enrich_location(
        &self,
        index: usize,
        mut location: LocationCandidate,
        permits: &[Semaphore],
    ) -> (LocationCandidate, Vec<GeocodingProvenance>, Vec<EnrichmentError>) {
        let mut provenance = Vec::new();
        let mut errors = Vec::new();

        let mut next = Lookup::plan(&location);
        while let Some(lookup) = next.take() {
            let resolution = self.resolve(&lookup, permits).await;
            errors.extend(resolution.store_errors);

            let Some(resolved) = resolution.resolved else {
                debug!(location = index, action = lookup.action().as_str(), "no provider resolved location");
                errors.push(EnrichmentError::AllProvidersExhausted {
                    location: index,
                    action: lookup.action().as_str(),
                });
                provenance.push(GeocodingProvenance {
                    action: lookup.action(),
                    provider: None,
                    cache_hit: false,
                    centroid: false,
                    low_resolution: false,
                    fields: Vec::new(),
                    attempts: resolution.attempts,
                });
                break;
            };

            let slot = &self.slots[resolved.slot];
            let mut entry = GeocodingProvenance {
                action: lookup.action(),
                provider: Some(slot.name().to_string()),
                cache_hit: resolved.cache_hit,
                centroid: false,
                low_resolution: slot.provider.is_low_resolution(),
                fields: Vec::new(),
                attempts: resolution.attempts,
            };

            match resolved.value {
                LookupValue::Coordinates(found) => {
                    location.latitude = Some(found.latitude);
                    location.longitude = Some(found.longitude);
                    if is_blank(location.geocoding_source.as_deref()) {
                        location.geocoding_source = Some(slot.name().to_string());
                    }
                    entry.centroid = found.centroid;
                    entry.fields = vec!["latitude".to_string(), "longitude".to_string()];

                    // Forward results rarely fill the postal code on their own.
                    next = match Lookup::plan(&location) {
                        Some(follow_up @ Lookup::Reverse { action: EnrichmentAction::PostalFill, .. }) => {
                            Some(follow_up)
                        }
                        _ => None,
                    };
                }
                LookupValue::Address(found) => {
                    let filled = match location.primary_address_mut() {
                        Some(existing) => existing.fill_missing_from(&found),
                        None => {
                            let filled = PostalAddress::default().fill_missing_from(&found);
                            location.addresses.push(found);
                            filled
                        }
                    };
                    entry.fields = filled.into_iter().map(str::to_string).collect();
                }
            }

            provenance.push(entry);
        }

        (location, provenance, errors)
    }

    /// Walks the provider chain for one lookup.
    async fn resolve(&self, lookup: &Lookup, permits: &[Semaphore]) -> Resolution {
        let mut attempts = Vec::new();
        let mut store_errors = Vec::new();

        for (index, slot) in self.slots.iter().enumerate() {
            let name = slot.name();

            match slot.breaker.allow_call().await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(provider = %name, "skipping provider with open circuit");
                    attempts.push(attempt(name, AttemptOutcome::CircuitOpen, 0));
                    continue;
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "circuit state unavailable, allowing call");
                    store_errors.push(EnrichmentError::Store(e));
                }
            }

            let Some(permit_pool) = permits.get(index) else {
                continue;
            };
            let Ok(_permit) = permit_pool.acquire().await else {
                continue;
            };

            match self.cache_get(name, lookup).await {
                Ok(Some(Cached::Found(value))) => {
                    self.metrics.record_cache_hit(lookup.cache_label()).await;
                    attempts.push(attempt(name, AttemptOutcome::CacheHit, 0));
                    return Resolution {
                        resolved: Some(Resolved { slot: index, value, cache_hit: true }),
                        attempts,
                        store_errors,
                    };
                }
                Ok(Some(Cached::Empty)) => {
                    self.metrics.record_cache_hit(lookup.cache_label()).await;
                    attempts.push(attempt(name, AttemptOutcome::Empty, 0));
                    continue;
                }
                Ok(None) => self.metrics.record_cache_miss(lookup.cache_label()).await,
                Err(e) => {
                    warn!(provider = %name, error = %e, "geocode cache unavailable, calling provider");
                    self.metrics.record_cache_miss(lookup.cache_label()).await;
                    store_errors.push(EnrichmentError::Store(e));
                }
            }

            let (result, calls) = self.call_with_retry(slot, lookup).await;
            match result {
                Ok(found) => {
                    self.metrics.record_provider_success(name).await;
                    if let Err(e) = slot.breaker.record_success().await {
                        warn!(provider = %name, error = %e, "failed to record provider success");
                        store_errors.push(EnrichmentError::Store(e));
                    }
                    if let Err(e) = self.cache_put(name, lookup, found.clone()).await {
                        warn!(provider = %name, error = %e, "failed to cache geocode result");
                        store_errors.push(EnrichmentError::Store(e));
                    }

                    match found {
                        Some(value) => {
                            attempts.push(attempt(name, AttemptOutcome::Success, calls));
                            return Resolution {
                                resolved: Some(Resolved { slot: index, value, cache_hit: false }),
                                attempts,
                                store_errors,
                            };
                        }
                        None => {
                            debug!(provider = %name, "provider returned no match");
                            attempts.push(attempt(name, AttemptOutcome::Empty, calls));
                        }
                    }
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, attempts = calls, "provider failed, failing over");
                    self.metrics.record_provider_failure(name, e.kind()).await;
                    if let Err(store_error) = slot.breaker.record_failure().await {
                        warn!(provider = %name, error = %store_error, "failed to record provider failure");
                        store_errors.push(EnrichmentError::Store(store_error));
                    }
                    attempts.push(attempt(name, AttemptOutcome::Failed, calls));
                }
            }
        }

        Resolution { resolved: None, attempts, store_errors }
    }

    /// Calls a provider, retrying transient failures with doubling delay.
    ///
    /// Returns the final result and the number of calls made.
    async fn call_with_retry(
        &self,
        slot: &ProviderSlot,
        lookup: &Lookup,
    ) -> (Result<Option<LookupValue>, ProviderError>, u32) {
        let max_attempts = self.settings.max_retries.max(1);
        let mut calls = 0;

        loop {
            calls += 1;
            let result = match tokio::time::timeout(slot.timeout, Self::call(slot, lookup)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };

            match result {
                Err(e) if e.is_transient() && calls < max_attempts => {
                    let delay = self.settings.retry_delay.saturating_mul(1 << (calls - 1).min(16));
                    debug!(
                        provider = %slot.name(),
                        attempt = calls,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "retrying provider after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return (other, calls),
            }
        }
    }

    async fn call(
        slot: &ProviderSlot,
        lookup: &Lookup,
    ) -> Result<Option<LookupValue>, ProviderError> {
        match lookup {
            Lookup::Forward { query } => {
                Ok(slot.provider.geocode(query).await?.map(LookupValue::Coordinates))
            }
            Lookup::Reverse { latitude, longitude, .. } => {
                Ok(slot.provider.reverse(*latitude, *longitude).await?.map(LookupValue::Address))
            }
        }
    }

    async fn cache_get(
        &self,
        provider: &str,
        lookup: &Lookup,
    ) -> Result<Option<Cached<LookupValue>>, crate::store::StoreError> {
        Ok(match lookup {
            Lookup::Forward { query } => {
                self.cache.get_forward(provider, query).await?.map(|cached| match cached {
                    Cached::Found(found) => Cached::Found(LookupValue::Coordinates(found)),
                    Cached::Empty => Cached::Empty,
                })
            }
            Lookup::Reverse { latitude, longitude, .. } => self
                .cache
                .get_reverse(provider, *latitude, *longitude)
                .await?
                .map(|cached| match cached {
                    Cached::Found(address) => Cached::Found(LookupValue::Address(address)),
                    Cached::Empty => Cached::Empty,
                }),
        })
    }

    async fn cache_put(
        &self,
        provider: &str,
        lookup: &Lookup,
        value: Option<LookupValue>,
    ) -> Result<(), crate::store::StoreError> {
        match (lookup, value) {
            (Lookup::Forward { query }, Some(LookupValue::Coordinates(found))) => {
                self.cache.put_forward(provider, query, &Cached::Found(found)).await
            }
            (Lookup::Forward { query }, _) => {
                self.cache.put_forward(provider, query, &Cached::Empty).await
            }
            (Lookup::Reverse { latitude, longitude, .. }, Some(LookupValue::Address(address))) => {
                self.cache.put_reverse(provider, *latitude, *longitude, &Cached::Found(address)).await
            }
            (Lookup::Reverse { latitude, longitude, .. }, _) => {
                self.cache.put_reverse(provider, *latitude, *longitude, &Cached::Empty).await
            }
        }
    }
}

fn attempt(provider: &str, outcome: AttemptOutcome, calls: u32) -> ProviderAttempt {
    ProviderAttempt { provider: provider.to_string(), outcome, calls }
}
