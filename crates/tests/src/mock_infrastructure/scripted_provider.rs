//! Scripted in-process geocoding provider.

use async_trait::async_trait;
use locus_core::{
    geocoding::{GeocodeMatch, GeocodeProvider, ProviderError},
    types::PostalAddress,
};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
};

type ForwardReply = Result<Option<GeocodeMatch>, ProviderError>;

/// Provider answering from a script instead of the network.
///
/// Forward lookups consume queued replies first and then repeat the fallback reply. Every
/// call is counted, so tests can assert how often the chain reached this provider.
pub struct ScriptedProvider {
    name: String,
    low_resolution: bool,
    queued: Mutex<VecDeque<ForwardReply>>,
    fallback: ForwardReply,
    reverse: Result<Option<PostalAddress>, ProviderError>,
    forward_calls: AtomicU32,
    reverse_calls: AtomicU32,
    queries: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new(name: &str, fallback: ForwardReply) -> Self {
        Self {
            name: name.to_string(),
            low_resolution: false,
            queued: Mutex::new(VecDeque::new()),
            fallback,
            reverse: Ok(None),
            forward_calls: AtomicU32::new(0),
            reverse_calls: AtomicU32::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Always resolves to the given precise coordinates.
    #[must_use]
    pub fn matching(name: &str, latitude: f64, longitude: f64) -> Self {
        Self::new(name, Ok(Some(GeocodeMatch::new(latitude, longitude))))
    }

    /// Works but never finds anything.
    #[must_use]
    pub fn empty(name: &str) -> Self {
        Self::new(name, Ok(None))
    }

    #[must_use]
    pub fn failing(name: &str, error: ProviderError) -> Self {
        Self::new(name, Err(error))
    }

    /// Queues a reply served before the fallback.
    #[must_use]
    pub fn then(self, reply: ForwardReply) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(reply);
        }
        self
    }

    #[must_use]
    pub fn with_reverse(mut self, address: PostalAddress) -> Self {
        self.reverse = Ok(Some(address));
        self
    }

    #[must_use]
    pub fn low_resolution(mut self) -> Self {
        self.low_resolution = true;
        self
    }

    #[must_use]
    pub fn forward_calls(&self) -> u32 {
        self.forward_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn reverse_calls(&self) -> u32 {
        self.reverse_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn calls(&self) -> u32 {
        self.forward_calls() + self.reverse_calls()
    }

    /// Forward queries received, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl GeocodeProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_low_resolution(&self) -> bool {
        self.low_resolution
    }

    async fn geocode(&self, query: &str) -> Result<Option<GeocodeMatch>, ProviderError> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }

        let queued = self.queued.lock().ok().and_then(|mut q| q.pop_front());
        queued.unwrap_or_else(|| self.fallback.clone())
    }

    async fn reverse(
        &self,
        _latitude: f64,
        _longitude: f64,
    ) -> Result<Option<PostalAddress>, ProviderError> {
        self.reverse_calls.fetch_add(1, Ordering::SeqCst);
        self.reverse.clone()
    }
}
