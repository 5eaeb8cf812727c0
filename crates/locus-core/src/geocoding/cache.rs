use super::provider::GeocodeMatch;
use crate::{
    store::{StateStore, StoreError},
    types::PostalAddress,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

/// Street-suffix and directional abbreviations applied during normalization.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("street", "st"),
    ("avenue", "ave"),
    ("boulevard", "blvd"),
    ("road", "rd"),
    ("drive", "dr"),
    ("lane", "ln"),
    ("court", "ct"),
    ("place", "pl"),
    ("parkway", "pkwy"),
    ("highway", "hwy"),
    ("suite", "ste"),
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
];

/// Normalizes an address query so that trivially different spellings share a cache key.
///
/// Lowercases, replaces punctuation with spaces, collapses whitespace and abbreviates common
/// street suffixes and directionals.
///
/// `"1 Main Street, Springfield, IL"` and `"1 main st springfield  il"` normalize to the same
/// key.
#[must_use]
pub fn normalize_address(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .map(|word| {
            ABBREVIATIONS
                .iter()
                .find(|(long, _)| *long == word)
                .map_or(word, |(_, short)| *short)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Prefix shared by every cache key; the store's size cap applies to it alone.
pub const CACHE_KEY_PREFIX: &str = "geocode:";

/// Cached provider answer. `Empty` records a definitive "no match" so it is not re-queried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Cached<T> {
    Found(T),
    Empty,
}

impl<T> Cached<T> {
    #[must_use]
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::Empty => None,
        }
    }
}

impl<T> From<Option<T>> for Cached<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Empty, Self::Found)
    }
}

/// Geocoding result cache over the shared [`StateStore`].
///
/// Keys are scoped per provider because providers disagree:
/// - forward: `geocode:fwd:{provider}:{normalized address}`
/// - reverse: `geocode:rev:{provider}:{lat},{lng}` with coordinates rounded to 5 decimals
pub struct GeocodeCache {
    store: Arc<dyn StateStore>,
    ttl: Duration,
}

impl GeocodeCache {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    #[must_use]
    pub fn forward_key(provider: &str, query: &str) -> String {
        format!("{CACHE_KEY_PREFIX}fwd:{provider}:{}", normalize_address(query))
    }

    #[must_use]
    pub fn reverse_key(provider: &str, latitude: f64, longitude: f64) -> String {
        format!("{CACHE_KEY_PREFIX}rev:{provider}:{latitude:.5},{longitude:.5}")
    }

    /// Returns the cached forward result for `query` at `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the shared store is unavailable.
    pub async fn get_forward(
        &self,
        provider: &str,
        query: &str,
    ) -> Result<Option<Cached<GeocodeMatch>>, StoreError> {
        self.get(&Self::forward_key(provider, query)).await
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the shared store is unavailable.
    pub async fn put_forward(
        &self,
        provider: &str,
        query: &str,
        value: &Cached<GeocodeMatch>,
    ) -> Result<(), StoreError> {
        self.put(&Self::forward_key(provider, query), value).await
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the shared store is unavailable.
    pub async fn get_reverse(
        &self,
        provider: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<Cached<PostalAddress>>, StoreError> {
        self.get(&Self::reverse_key(provider, latitude, longitude)).await
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the shared store is unavailable.
    pub async fn put_reverse(
        &self,
        provider: &str,
        latitude: f64,
        longitude: f64,
        value: &Cached<PostalAddress>,
    ) -> Result<(), StoreError> {
        self.put(&Self::reverse_key(provider, latitude, longitude), value).await
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Cached<T>>, StoreError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "discarding undecodable cache entry");
                self.store.delete(key).await?;
                Ok(None)
            }
        }
    }

    async fn put<T: Serialize>(&self, key: &str, value: &Cached<T>) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| StoreError::Backend(format!("cache serialization failed: {e}")))?;
        self.store.set(key, &raw, Some(self.ttl)).await
    }
}
