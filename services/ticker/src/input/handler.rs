//! Per-exchange WebSocket handler with automatic reconnection.
//!
//! One handler owns one live connection to one exchange, the set of
//! symbols subscribed on it, and the small state machine that governs the
//! connection lifecycle:
//!
//! ```text
//! Disconnected → Connecting → Connected ⇄ Reconnecting → Error
//!        ↑______________ stop() from any state ______________|
//! ```
//!
//! Entry points (`start`, `stop`, `update_symbols`) are serialized by a
//! per-handler mutex; event delivery runs on the client's tasks and never
//! contends with them beyond the subscription registry.

use config::ReconnectConfig;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use types::{Credentials, RawTickerEvent, UserExchange};

use crate::error::{Result, TickerError};
use crate::normalizer::normalize;
use crate::store::CredentialResolver;

use super::{
    ConnectionState, ConnectorFactory, EventCallback, ExchangeConnector, SubscriptionRegistry,
    TickCallback,
};

/// Handler for one exchange connection. Cheap to clone via its inner `Arc`;
/// the daemon keeps one per configured exchange.
#[derive(Clone)]
pub struct ExchangeHandler {
    inner: Arc<HandlerInner>,
}

struct HandlerInner {
    /// Self-reference for tasks and callbacks that outlive a borrow.
    weak_self: Weak<HandlerInner>,
    account: UserExchange,
    exchange: String,
    factory: Arc<dyn ConnectorFactory>,
    resolver: Arc<dyn CredentialResolver>,
    policy: ReconnectConfig,

    // Serializes start/stop/update_symbols and reconnect retries.
    op_lock: tokio::sync::Mutex<()>,
    connector: tokio::sync::RwLock<Option<Arc<dyn ExchangeConnector>>>,

    /// Symbols the handler should be subscribed to. Diverges from the
    /// registry only while disconnected or after partial failures.
    intended: Mutex<HashSet<String>>,
    subscriptions: SubscriptionRegistry,

    state: RwLock<ConnectionState>,
    reconnect_count: AtomicU32,
    reconnecting: AtomicBool,
    last_event: Mutex<Option<f64>>,
    callback: RwLock<Option<TickCallback>>,

    /// Set to `true` by `stop` so backoff sleeps cancel promptly.
    stop_tx: watch::Sender<bool>,
}

impl ExchangeHandler {
    pub fn new(
        account: UserExchange,
        exchange: impl Into<String>,
        symbols: impl IntoIterator<Item = String>,
        factory: Arc<dyn ConnectorFactory>,
        resolver: Arc<dyn CredentialResolver>,
        policy: ReconnectConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let exchange = exchange.into();
        let symbols: HashSet<String> = symbols.into_iter().collect();
        Self {
            inner: Arc::new_cyclic(|weak_self| HandlerInner {
                weak_self: weak_self.clone(),
                account,
                exchange,
                factory,
                resolver,
                policy,
                op_lock: tokio::sync::Mutex::new(()),
                connector: tokio::sync::RwLock::new(None),
                intended: Mutex::new(symbols),
                subscriptions: SubscriptionRegistry::new(),
                state: RwLock::new(ConnectionState::Disconnected),
                reconnect_count: AtomicU32::new(0),
                reconnecting: AtomicBool::new(false),
                last_event: Mutex::new(None),
                callback: RwLock::new(None),
                stop_tx,
            }),
        }
    }

    /// Canonical exchange name this handler serves.
    pub fn exchange_name(&self) -> &str {
        &self.inner.exchange
    }

    /// The exchange account this handler was built for.
    pub fn account(&self) -> UserExchange {
        self.inner.account.clone()
    }

    /// Install the per-tick delivery callback. Takes effect on the next
    /// event; must be installed before `start` for ticks to be delivered.
    pub fn set_callback(&self, callback: TickCallback) {
        *self.inner.callback.write() = Some(callback);
    }

    pub fn status(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionState::Connected
    }

    pub fn reconnect_count(&self) -> u32 {
        self.inner.reconnect_count.load(Ordering::Relaxed)
    }

    /// Time of the last delivered event, epoch seconds.
    pub fn last_event_time(&self) -> Option<f64> {
        *self.inner.last_event.lock()
    }

    /// Symbols the handler is meant to cover, subscribed or not.
    pub fn intended_symbols(&self) -> HashSet<String> {
        self.inner.intended.lock().clone()
    }

    /// Symbols with a live subscription right now.
    pub fn subscribed_symbols(&self) -> HashSet<String> {
        self.inner.subscriptions.snapshot()
    }

    /// Connect and subscribe the intended symbol set.
    ///
    /// Idempotent while Connected. Any failure rolls back partial
    /// subscriptions, disconnects, parks the handler in Error and schedules
    /// background reconnection with exponential backoff.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let _op = inner.op_lock.lock().await;

        if inner.state() == ConnectionState::Connected {
            debug!(exchange = %inner.exchange, "start ignored, already connected");
            return Ok(());
        }

        let _ = inner.stop_tx.send(false);
        inner.set_state(ConnectionState::Connecting);
        info!(
            exchange = %inner.exchange,
            symbols = inner.intended.lock().len(),
            "starting exchange connection"
        );

        match inner.connect_and_subscribe(true).await {
            Ok(()) => {
                inner.set_state(ConnectionState::Connected);
                inner.reconnect_count.store(0, Ordering::Relaxed);
                info!(
                    exchange = %inner.exchange,
                    subscribed = inner.subscriptions.len(),
                    "connected"
                );
                Ok(())
            }
            Err(e) => {
                inner.set_state(ConnectionState::Error);
                inner.reconnect_count.fetch_add(1, Ordering::Relaxed);
                error!(exchange = %inner.exchange, error = %e, "connection sequence failed");
                inner.spawn_reconnect();
                Err(e)
            }
        }
    }

    /// Unsubscribe everything (best-effort), disconnect, and go quiet.
    /// Safe to call repeatedly; the handler can be started again after.
    pub async fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        // Cancel a pending backoff sleep before taking the op lock; the
        // reconnect task only holds the lock while actively retrying.
        let _ = inner.stop_tx.send(true);
        let _op = inner.op_lock.lock().await;

        if inner.state() == ConnectionState::Disconnected {
            return Ok(());
        }

        info!(exchange = %inner.exchange, "stopping exchange connection");
        inner.teardown_connection().await;
        inner.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    /// Reconcile live subscriptions against `desired`.
    ///
    /// Removed symbols are unsubscribed, added symbols subscribed; partial
    /// failures are logged and skipped, never fatal. While not connected
    /// only the intended set is updated and no client traffic is issued.
    pub async fn update_symbols(&self, desired: HashSet<String>) -> Result<()> {
        let inner = &self.inner;
        let _op = inner.op_lock.lock().await;

        *inner.intended.lock() = desired.clone();

        if inner.state() != ConnectionState::Connected {
            debug!(
                exchange = %inner.exchange,
                symbols = desired.len(),
                "not connected, recorded intended symbol set only"
            );
            return Ok(());
        }

        let connector = inner
            .connector
            .read()
            .await
            .clone()
            .ok_or_else(|| TickerError::Internal("connected handler without client".to_string()))?;

        let current = inner.subscriptions.snapshot();

        for symbol in current.difference(&desired) {
            let Some(handle) = inner.subscriptions.get(symbol) else {
                continue;
            };
            match connector.unsubscribe(&handle).await {
                Ok(()) => {
                    inner.subscriptions.remove(symbol);
                    debug!(exchange = %inner.exchange, symbol = %symbol, "unsubscribed");
                }
                Err(e) => warn!(
                    exchange = %inner.exchange,
                    symbol = %symbol,
                    error = %e,
                    "unsubscribe failed, keeping registry entry"
                ),
            }
        }

        for symbol in desired.difference(&current) {
            match connector
                .subscribe_ticker(symbol, inner.event_callback())
                .await
            {
                Ok(handle) => {
                    inner.subscriptions.add(symbol.clone(), handle);
                    debug!(exchange = %inner.exchange, symbol = %symbol, "subscribed");
                }
                Err(e) => warn!(
                    exchange = %inner.exchange,
                    symbol = %symbol,
                    error = %e,
                    "subscribe failed"
                ),
            }
        }

        Ok(())
    }
}

impl HandlerInner {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Resolve credentials, connect, and subscribe the intended set.
    ///
    /// In strict mode (initial start) the first subscribe failure rolls the
    /// whole sequence back. In lenient mode (reconnect) the prior set is
    /// restored best-effort and each missing symbol logged as a warning.
    async fn connect_and_subscribe(&self, strict: bool) -> Result<()> {
        let credentials = match self.resolver.resolve(&self.account) {
            Ok(c) => c,
            Err(e) => {
                debug!(
                    exchange = %self.exchange,
                    error = %e,
                    "no credentials resolved, proceeding with public access"
                );
                Credentials::public()
            }
        };

        let connector = self
            .factory
            .connector(&self.account, &self.exchange, &credentials);

        let weak = self.weak_self.clone();
        connector.set_status_callback(Arc::new(move |connected| {
            if connected {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                inner.on_connection_lost();
            }
        }));

        connector
            .connect()
            .await
            .map_err(|e| TickerError::ConnectFailed {
                exchange: self.exchange.clone(),
                reason: e.to_string(),
            })?;

        *self.connector.write().await = Some(connector.clone());

        let mut symbols: Vec<String> = self.intended.lock().iter().cloned().collect();
        symbols.sort();
        for symbol in &symbols {
            match connector
                .subscribe_ticker(symbol, self.event_callback())
                .await
            {
                Ok(handle) => self.subscriptions.add(symbol.clone(), handle),
                Err(e) if strict => {
                    warn!(
                        exchange = %self.exchange,
                        symbol = %symbol,
                        error = %e,
                        "subscribe failed during start, rolling back"
                    );
                    self.teardown_connection().await;
                    return Err(TickerError::SubscribeFailed {
                        exchange: self.exchange.clone(),
                        symbol: symbol.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => warn!(
                    exchange = %self.exchange,
                    symbol = %symbol,
                    error = %e,
                    "symbol not restored on reconnect"
                ),
            }
        }

        Ok(())
    }

    /// Unsubscribe every registered handle and drop the client.
    async fn teardown_connection(&self) {
        let connector = self.connector.write().await.take();
        let entries = self.subscriptions.drain();
        if let Some(connector) = connector {
            for (symbol, handle) in entries {
                if let Err(e) = connector.unsubscribe(&handle).await {
                    debug!(
                        exchange = %self.exchange,
                        symbol = %symbol,
                        error = %e,
                        "unsubscribe during teardown failed"
                    );
                }
            }
            if let Err(e) = connector.disconnect().await {
                debug!(exchange = %self.exchange, error = %e, "disconnect failed");
            }
        }
    }

    /// Client signalled a lost connection: enter Reconnecting and spawn the
    /// backoff task. Races with `stop` resolve through the state check.
    fn on_connection_lost(&self) {
        {
            let mut state = self.state.write();
            if *state != ConnectionState::Connected {
                return;
            }
            *state = ConnectionState::Reconnecting;
        }
        warn!(exchange = %self.exchange, "connection lost");
        self.reconnect_count.store(1, Ordering::Relaxed);
        self.spawn_reconnect();
    }

    fn spawn_reconnect(&self) {
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(inner) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            inner.run_reconnect_loop().await;
            inner.reconnecting.store(false, Ordering::Release);
        });
    }

    /// Backoff-retry loop. Sleeps `min(2^attempt, cap)` seconds per
    /// attempt, gives up after the configured budget, and bails out the
    /// moment `stop` is requested.
    async fn run_reconnect_loop(&self) {
        let mut stop_rx = self.stop_tx.subscribe();
        loop {
            let attempt = self.reconnect_count.load(Ordering::Relaxed).max(1);
            if attempt > self.policy.max_attempts {
                self.set_state(ConnectionState::Error);
                error!(
                    exchange = %self.exchange,
                    attempts = self.policy.max_attempts,
                    "reconnect budget exhausted, handler is terminal"
                );
                return;
            }

            let delay = backoff_delay(attempt, self.policy.max_backoff_secs);
            info!(
                exchange = %self.exchange,
                attempt,
                delay_secs = delay.as_secs(),
                "reconnect scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_rx.wait_for(|stopped| *stopped) => return,
            }

            let _op = self.op_lock.lock().await;
            if *stop_rx.borrow() || self.state() == ConnectionState::Disconnected {
                return;
            }
            if self.state() == ConnectionState::Connected {
                return;
            }

            self.set_state(ConnectionState::Reconnecting);
            match self.connect_and_subscribe(false).await {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    self.reconnect_count.store(0, Ordering::Relaxed);
                    info!(
                        exchange = %self.exchange,
                        restored = self.subscriptions.len(),
                        "reconnected"
                    );
                    return;
                }
                Err(e) => {
                    warn!(exchange = %self.exchange, attempt, error = %e, "reconnect attempt failed");
                    self.teardown_connection().await;
                    self.reconnect_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Per-event delivery path: normalize, hand to the installed callback,
    /// record the event time. Failures here never touch connection state.
    fn event_callback(&self) -> EventCallback {
        let weak = self.weak_self.clone();
        Arc::new(move |raw: RawTickerEvent| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.deliver(raw).await;
                }
            })
        })
    }

    async fn deliver(&self, raw: RawTickerEvent) {
        let tick = match normalize(raw, &self.exchange) {
            Ok(tick) => tick,
            Err(e) => {
                warn!(exchange = %self.exchange, error = %e, "dropping malformed ticker event");
                return;
            }
        };

        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            if let Err(e) = callback(tick.clone()).await {
                warn!(
                    exchange = %self.exchange,
                    symbol = %tick.symbol,
                    error = %e,
                    "tick delivery failed"
                );
            }
        }

        *self.last_event.lock() = Some(tick.time);
    }
}

/// Exponential backoff: `min(2^attempt, cap)` seconds.
fn backoff_delay(attempt: u32, max_backoff_secs: u64) -> Duration {
    let raw = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(raw.min(max_backoff_secs))
}
