//! Externally shared key/value state.
//!
//! Circuit breaker counters and geocoding cache entries must be visible to every worker
//! process, so they live behind [`StateStore`] rather than in process-local maps. Every
//! operation is atomic per key; in particular [`StateStore::increment`] and
//! [`StateStore::compare_and_set`] let two workers race on the same breaker without both
//! believing they opened it.
//!
//! # Backends
//!
//! - [`InMemoryStateStore`]: `DashMap` with entry-level locking. Shared between tasks of one
//!   process; used in tests and single-worker deployments.
//! - [`SqliteStateStore`]: `SQLite` table shared by every process pointing at the same file.
//!
//! Both backends accept a [`CapacityLimit`] that bounds the number of keys under one prefix.
//! Keys outside the prefix (breaker state) are never evicted to make room.
//!
//! Expired entries are invisible to all operations. Expiry is wall-clock based (unix
//! milliseconds) so that processes agree on it.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStateStore;
pub use sqlite::SqliteStateStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by state store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database rejected or failed the operation.
    #[error("store backend error: {0}")]
    Backend(String),

    /// `increment` was called on a key holding a non-integer value.
    #[error("value for key '{key}' is not an integer")]
    NotAnInteger { key: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Upper bound on the number of keys sharing a prefix.
///
/// When a new key under `prefix` would exceed `max_entries`, expired entries go first and then
/// the entries under `prefix` closest to expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityLimit {
    pub prefix: String,
    pub max_entries: usize,
}

impl CapacityLimit {
    #[must_use]
    pub fn new(prefix: impl Into<String>, max_entries: usize) -> Self {
        Self { prefix: prefix.into(), max_entries: max_entries.max(1) }
    }

    #[must_use]
    pub fn applies_to(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }
}

/// Atomic per-key string store with optional expiry.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the live value for `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes `value`, replacing any previous value and expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Adds one to the integer stored at `key` and returns the new value.
    ///
    /// A missing or expired key starts from zero and receives `ttl`; an existing key keeps its
    /// expiry.
    async fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<i64, StoreError>;

    /// Replaces the value only if the current live value equals `expected`.
    ///
    /// `expected: None` means "the key is absent"; `new: None` deletes the key. Returns whether
    /// the swap happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Removes `key`. Returns whether a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Drops expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, StoreError>;
}

/// Current wall-clock time in unix milliseconds.
#[inline]
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute expiry for a TTL starting now.
#[inline]
pub(crate) fn expiry_millis(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now_millis().saturating_add(ttl_ms)
    })
}
