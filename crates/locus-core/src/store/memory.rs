use super::{expiry_millis, now_millis, CapacityLimit, StateStore, StoreError};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<i64>,
}

impl StoredValue {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self { value: value.to_string(), expires_at: expiry_millis(ttl) }
    }

    fn is_live(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Process-local [`StateStore`] backed by a `DashMap`.
///
/// Per-key atomicity comes from holding the shard lock of the entry for the duration of each
/// read-modify-write. With a [`CapacityLimit`], inserting a new key under the limited prefix
/// into a full prefix first drops expired entries and then the prefixed entry closest to
/// expiry.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    entries: DashMap<String, StoredValue>,
    limit: Option<CapacityLimit>,
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity_limit(limit: CapacityLimit) -> Self {
        Self { entries: DashMap::new(), limit: Some(limit) }
    }

    /// Number of stored entries, including ones that have expired but not been evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_expired(&self) -> usize {
        let now = now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, v| v.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    fn limited_len(&self, limit: &CapacityLimit) -> usize {
        self.entries.iter().filter(|e| limit.applies_to(e.key())).count()
    }

    /// Makes room for one new key. Must not be called while holding an entry guard.
    fn make_room(&self, key: &str) {
        let Some(limit) = self.limit.as_ref().filter(|l| l.applies_to(key)) else {
            return;
        };
        if self.entries.len() < limit.max_entries || self.entries.contains_key(key) {
            return;
        }
        if self.limited_len(limit) < limit.max_entries {
            return;
        }

        self.evict_expired();
        let mut limited = self.limited_len(limit);

        while limited >= limit.max_entries {
            let victim = self
                .entries
                .iter()
                .filter(|e| limit.applies_to(e.key()))
                .min_by_key(|e| e.value().expires_at.unwrap_or(i64::MAX))
                .map(|e| e.key().clone());

            match victim {
                Some(victim) => {
                    self.entries.remove(&victim);
                    limited -= 1;
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = now_millis();
        Ok(self.entries.get(key).filter(|v| v.is_live(now)).map(|v| v.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.make_room(key);
        self.entries.insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<i64, StoreError> {
        self.make_room(key);
        let now = now_millis();

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let stored = occupied.get_mut();
                if !stored.is_live(now) {
                    *stored = StoredValue::new("1", ttl);
                    return Ok(1);
                }

                let current: i64 = stored
                    .value
                    .parse()
                    .map_err(|_| StoreError::NotAnInteger { key: key.to_string() })?;
                let next = current.saturating_add(1);
                stored.value = next.to_string();
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new("1", ttl));
                Ok(1)
            }
        }
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        if new.is_some() {
            self.make_room(key);
        }
        let now = now_millis();

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = Some(occupied.get()).filter(|v| v.is_live(now)).map(|v| v.value.as_str());
                if current != expected {
                    return Ok(false);
                }
                match new {
                    Some(value) => {
                        *occupied.get_mut() = StoredValue::new(value, ttl);
                    }
                    None => {
                        occupied.remove();
                    }
                }
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                if let Some(value) = new {
                    vacant.insert(StoredValue::new(value, ttl));
                }
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = now_millis();
        Ok(self.entries.remove(key).is_some_and(|(_, v)| v.is_live(now)))
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        Ok(u64::try_from(self.evict_expired()).unwrap_or(u64::MAX))
    }
}
