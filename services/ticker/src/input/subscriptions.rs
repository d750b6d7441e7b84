//! Per-handler registry of live subscriptions.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use super::SubscriptionHandle;

/// Map from symbol to the opaque handle the WebSocket client issued for it.
///
/// Owned exclusively by one handler; the registry reflects subscriptions
/// that actually succeeded, never intent.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, SubscriptionHandle>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful subscription. Replaces any stale entry for the
    /// same symbol.
    pub fn add(&self, symbol: impl Into<String>, handle: SubscriptionHandle) {
        self.entries.lock().insert(symbol.into(), handle);
    }

    /// Remove a symbol after a successful unsubscribe, returning its handle.
    pub fn remove(&self, symbol: &str) -> Option<SubscriptionHandle> {
        self.entries.lock().remove(symbol)
    }

    /// Handle for a symbol, if subscribed.
    pub fn get(&self, symbol: &str) -> Option<SubscriptionHandle> {
        self.entries.lock().get(symbol).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.entries.lock().contains_key(symbol)
    }

    /// Symbols currently subscribed.
    pub fn snapshot(&self) -> HashSet<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Take every entry, leaving the registry empty. Used by `stop`.
    pub fn drain(&self) -> Vec<(String, SubscriptionHandle)> {
        self.entries.lock().drain().collect()
    }
}
