//! Simulated exchange connector.
//!
//! Generates a random-walk ticker stream per subscribed symbol, letting the
//! daemon run end-to-end without network access. The demo binary wires this
//! in place of a real WebSocket client; deployments provide their own
//! [`ExchangeConnector`] implementation.

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use types::{epoch_now, Credentials, RawTickerEvent, UserExchange};

use crate::error::{Result, TickerError};

use super::{
    ConnectorFactory, EventCallback, ExchangeConnector, StatusCallback, SubscriptionHandle,
};

/// Connector that synthesizes ticker events instead of speaking to an
/// exchange. One generator task per subscription.
pub struct SimConnector {
    exchange: String,
    tick_interval: Duration,
    connected: AtomicBool,
    next_id: AtomicU64,
    generators: DashMap<u64, JoinHandle<()>>,
    status_callback: Mutex<Option<StatusCallback>>,
}

impl SimConnector {
    pub fn new(exchange: impl Into<String>, tick_interval: Duration) -> Self {
        Self {
            exchange: exchange.into(),
            tick_interval,
            connected: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            generators: DashMap::new(),
            status_callback: Mutex::new(None),
        }
    }

    /// Fire the status callback as a real client would on a dropped socket.
    /// Generator tasks keep running; the handler tears them down through
    /// the normal unsubscribe path.
    pub fn simulate_connection_loss(&self) {
        let callback = self.status_callback.lock().clone();
        if let Some(callback) = callback {
            callback(false);
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.generators.len()
    }
}

#[async_trait::async_trait]
impl ExchangeConnector for SimConnector {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        for entry in self.generators.iter() {
            entry.value().abort();
        }
        self.generators.clear();
        Ok(())
    }

    async fn subscribe_ticker(
        &self,
        symbol: &str,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TickerError::ConnectFailed {
                exchange: self.exchange.clone(),
                reason: "not connected".to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(generate_ticks(
            symbol.to_string(),
            self.tick_interval,
            callback,
        ));
        self.generators.insert(id, task);

        Ok(SubscriptionHandle {
            id,
            symbol: symbol.to_string(),
        })
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()> {
        match self.generators.remove(&handle.id) {
            Some((_, task)) => {
                task.abort();
                Ok(())
            }
            None => Err(TickerError::UnsubscribeFailed {
                exchange: self.exchange.clone(),
                symbol: handle.symbol.clone(),
                reason: "unknown subscription handle".to_string(),
            }),
        }
    }

    fn set_status_callback(&self, callback: StatusCallback) {
        *self.status_callback.lock() = Some(callback);
    }
}

async fn generate_ticks(symbol: String, interval: Duration, callback: EventCallback) {
    let mut price = base_price(&symbol);
    loop {
        tokio::time::sleep(interval).await;

        let (drift, spread, volume) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(-0.001..0.001),
                rng.gen_range(0.0001..0.001),
                rng.gen_range(0.1..50.0),
            )
        };
        price *= 1.0 + drift;

        let event: RawTickerEvent = serde_json::from_value(json!({
            "symbol": symbol,
            "price": price,
            "bid": price * (1.0 - spread),
            "ask": price * (1.0 + spread),
            "volume": volume,
            "time": epoch_now(),
        }))
        .unwrap_or_default();

        callback(event).await;
    }
}

/// Deterministic starting price per symbol so restarts look continuous
/// enough for demos.
fn base_price(symbol: &str) -> f64 {
    let mut hasher = DefaultHasher::new();
    symbol.hash(&mut hasher);
    100.0 + (hasher.finish() % 50_000) as f64
}

/// Factory handing out one [`SimConnector`] per exchange account.
pub struct SimConnectorFactory {
    tick_interval: Duration,
}

impl SimConnectorFactory {
    pub fn new(tick_interval: Duration) -> Self {
        Self { tick_interval }
    }
}

impl Default for SimConnectorFactory {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl ConnectorFactory for SimConnectorFactory {
    fn connector(
        &self,
        _account: &UserExchange,
        canonical_name: &str,
        _credentials: &Credentials,
    ) -> Arc<dyn ExchangeConnector> {
        Arc::new(SimConnector::new(canonical_name, self.tick_interval))
    }
}
