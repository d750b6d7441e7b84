//! Test harness for driving the ticker daemon end-to-end: scripted
//! connectors standing in for exchange WebSocket clients, and a counting
//! configuration store for regression-guarding bulk reads.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use ticker_service::{
    ConfigStore, ConnectorFactory, EventCallback, ExchangeConnector, Result, StaticConfigStore,
    StatusCallback, SubscriptionHandle, TickerError,
};
use types::{Credentials, ExchangeCategory, RawTickerEvent, SymbolDescriptor, UserExchange};

/// Scripted stand-in for one exchange's WebSocket client. Tests push
/// events through it and script connect/subscribe failures.
pub struct ScriptedConnector {
    exchange: String,
    next_id: AtomicU64,
    connect_calls: AtomicU32,
    connect_failures: AtomicU32,
    subscribe_failures: DashMap<String, u32>,
    subscribe_calls: Mutex<Vec<String>>,
    unsubscribe_calls: Mutex<Vec<SubscriptionHandle>>,
    callbacks: DashMap<u64, (String, EventCallback)>,
    status_callback: Mutex<Option<StatusCallback>>,
}

impl ScriptedConnector {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            next_id: AtomicU64::new(1),
            connect_calls: AtomicU32::new(0),
            connect_failures: AtomicU32::new(0),
            subscribe_failures: DashMap::new(),
            subscribe_calls: Mutex::new(Vec::new()),
            unsubscribe_calls: Mutex::new(Vec::new()),
            callbacks: DashMap::new(),
            status_callback: Mutex::new(None),
        }
    }

    /// Script the next `n` connect calls to fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::Relaxed);
    }

    /// Script the next `n` subscribes for one symbol to fail.
    pub fn fail_subscribes(&self, symbol: &str, n: u32) {
        self.subscribe_failures.insert(symbol.to_string(), n);
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::Relaxed)
    }

    pub fn subscribe_calls(&self) -> Vec<String> {
        self.subscribe_calls.lock().clone()
    }

    pub fn unsubscribe_calls(&self) -> Vec<SubscriptionHandle> {
        self.unsubscribe_calls.lock().clone()
    }

    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.callbacks
            .iter()
            .map(|entry| entry.value().0.clone())
            .collect()
    }

    /// Deliver a raw JSON event to the live subscription for `symbol`.
    pub async fn push_json(&self, symbol: &str, event: serde_json::Value) {
        let raw: RawTickerEvent = serde_json::from_value(event).expect("valid raw event JSON");
        let callback = self
            .callbacks
            .iter()
            .find(|entry| entry.value().0 == symbol)
            .map(|entry| entry.value().1.clone());
        if let Some(callback) = callback {
            callback(raw).await;
        }
    }

    /// Fire the status callback as a dropped socket would.
    pub fn signal_disconnect(&self) {
        let callback = self.status_callback.lock().clone();
        if let Some(callback) = callback {
            callback(false);
        }
    }
}

#[async_trait]
impl ExchangeConnector for ScriptedConnector {
    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::Relaxed);
        let failed = self
            .connect_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| {
                (left > 0).then(|| left - 1)
            })
            .is_ok();
        if failed {
            return Err(TickerError::Internal("scripted connect failure".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.callbacks.clear();
        Ok(())
    }

    async fn subscribe_ticker(
        &self,
        symbol: &str,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle> {
        self.subscribe_calls.lock().push(symbol.to_string());
        if let Some(mut left) = self.subscribe_failures.get_mut(symbol) {
            if *left > 0 {
                *left -= 1;
                return Err(TickerError::SubscribeFailed {
                    exchange: self.exchange.clone(),
                    symbol: symbol.to_string(),
                    reason: "scripted subscribe failure".to_string(),
                });
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.insert(id, (symbol.to_string(), callback));
        Ok(SubscriptionHandle {
            id,
            symbol: symbol.to_string(),
        })
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()> {
        self.unsubscribe_calls.lock().push(handle.clone());
        self.callbacks.remove(&handle.id);
        Ok(())
    }

    fn set_status_callback(&self, callback: StatusCallback) {
        *self.status_callback.lock() = Some(callback);
    }
}

/// Factory handing out one [`ScriptedConnector`] per exchange, shared with
/// the test so scripted failures survive handler recreation.
#[derive(Default)]
pub struct ScriptedFactory {
    connectors: DashMap<String, Arc<ScriptedConnector>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The connector for one exchange, creating it if needed.
    pub fn get(&self, exchange: &str) -> Arc<ScriptedConnector> {
        self.connectors
            .entry(exchange.to_string())
            .or_insert_with(|| Arc::new(ScriptedConnector::new(exchange)))
            .clone()
    }
}

impl ConnectorFactory for ScriptedFactory {
    fn connector(
        &self,
        _account: &UserExchange,
        canonical_name: &str,
        _credentials: &Credentials,
    ) -> Arc<dyn ExchangeConnector> {
        self.get(canonical_name)
    }
}

/// Config store wrapper counting bulk reads and invalidations, the
/// regression guard against reintroducing per-exchange symbol lookups.
pub struct CountingConfigStore {
    inner: StaticConfigStore,
    symbol_reads: AtomicU64,
    invalidations: AtomicU64,
}

impl CountingConfigStore {
    pub fn new(inner: StaticConfigStore) -> Self {
        Self {
            inner,
            symbol_reads: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn symbol_reads(&self) -> u64 {
        self.symbol_reads.load(Ordering::Relaxed)
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &StaticConfigStore {
        &self.inner
    }
}

#[async_trait]
impl ConfigStore for CountingConfigStore {
    async fn get_user_id(&self, email: &str) -> Result<Option<u32>> {
        self.inner.get_user_id(email).await
    }

    async fn get_user_exchanges(&self, user_id: u32) -> Result<Vec<UserExchange>> {
        self.inner.get_user_exchanges(user_id).await
    }

    async fn get_exchange_categories(&self, all: bool) -> Result<Vec<ExchangeCategory>> {
        self.inner.get_exchange_categories(all).await
    }

    async fn get_symbols(&self, all: bool) -> Result<Vec<SymbolDescriptor>> {
        self.symbol_reads.fetch_add(1, Ordering::Relaxed);
        self.inner.get_symbols(all).await
    }

    async fn invalidate_caches(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        self.inner.invalidate_caches().await;
    }
}
