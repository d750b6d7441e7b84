//! Daemon supervisor: lifecycle, crash-recovery and aggregate health.
//!
//! `start` loads the admin identity's exchanges, bulk-loads symbols once,
//! spawns one [`ExchangeHandler`] per exchange with at least one symbol,
//! and launches three background tasks: the symbol refresh loop, a
//! supervisor sweep that recreates handlers stuck in terminal Error, and a
//! one-second heartbeat on the daemon health entry. `stop` unwinds all of
//! it cooperatively.

use config::{ReconnectConfig, ServiceConfig};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::{SymbolDescriptor, UserExchange};

use crate::error::{Result, TickerError};
use crate::health::HealthReporter;
use crate::input::{ConnectionState, ConnectorFactory, ExchangeHandler};
use crate::manager::{TickerManager, TickerStats};
use crate::output::{ProcessStore, TickStore};
use crate::refresh::{self, load_desired_topology, HandlerMap};
use crate::store::{ConfigStore, CredentialResolver};

/// Daemon lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl std::fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DaemonStatus::Stopped => "stopped",
            DaemonStatus::Starting => "starting",
            DaemonStatus::Running => "running",
            DaemonStatus::Stopping => "stopping",
            DaemonStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Everything the daemon consumes, injected once at construction.
#[derive(Clone)]
pub struct Dependencies {
    pub config_store: Arc<dyn ConfigStore>,
    pub credential_resolver: Arc<dyn CredentialResolver>,
    pub connector_factory: Arc<dyn ConnectorFactory>,
    pub tick_store: Arc<dyn TickStore>,
    pub process_store: Arc<dyn ProcessStore>,
}

/// Aggregate health view returned by [`TickerDaemon::health`].
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    pub status: String,
    pub running: bool,
    pub exchanges: HashMap<String, HandlerHealth>,
    pub ticker_stats: TickerStats,
}

/// Per-handler slice of the health view.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerHealth {
    pub connected: bool,
    pub state: String,
    pub last_event_time: Option<f64>,
    pub reconnect_count: u32,
}

/// Builds handlers wired into the manager; shared with the supervisor
/// sweep so recreated handlers are indistinguishable from originals.
#[derive(Clone)]
struct HandlerBuilder {
    factory: Arc<dyn ConnectorFactory>,
    resolver: Arc<dyn CredentialResolver>,
    policy: ReconnectConfig,
    manager: Arc<TickerManager>,
}

impl HandlerBuilder {
    fn build(
        &self,
        account: UserExchange,
        exchange: &str,
        symbols: impl IntoIterator<Item = String>,
    ) -> ExchangeHandler {
        let handler = ExchangeHandler::new(
            account,
            exchange,
            symbols,
            self.factory.clone(),
            self.resolver.clone(),
            self.policy.clone(),
        );
        let manager = self.manager.clone();
        let name = exchange.to_string();
        handler.set_callback(Arc::new(move |tick| {
            let manager = manager.clone();
            let name = name.clone();
            Box::pin(async move { manager.on_tick(&name, tick).await })
        }));
        handler
    }
}

pub struct TickerDaemon {
    config: ServiceConfig,
    deps: Dependencies,
    manager: Arc<TickerManager>,
    health: Arc<HealthReporter>,
    handlers: HandlerMap,
    status: Arc<RwLock<DaemonStatus>>,
    /// Serializes start/stop/restart/process_ticker.
    lifecycle: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl TickerDaemon {
    pub fn new(config: ServiceConfig, deps: Dependencies) -> Self {
        let health = Arc::new(HealthReporter::new(deps.process_store.clone()));
        let manager = Arc::new(TickerManager::new(deps.tick_store.clone(), health.clone()));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            deps,
            manager,
            health,
            handlers: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            status: Arc::new(RwLock::new(DaemonStatus::Stopped)),
            lifecycle: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    pub fn status(&self) -> DaemonStatus {
        *self.status.read()
    }

    pub fn is_running(&self) -> bool {
        self.status() == DaemonStatus::Running
    }

    /// The central fan-in, for callers that submit ticks directly.
    pub fn manager(&self) -> &Arc<TickerManager> {
        &self.manager
    }

    fn set_status(&self, status: DaemonStatus) {
        *self.status.write() = status;
    }

    fn builder(&self) -> HandlerBuilder {
        HandlerBuilder {
            factory: self.deps.connector_factory.clone(),
            resolver: self.deps.credential_resolver.clone(),
            policy: self.config.reconnect.clone(),
            manager: self.manager.clone(),
        }
    }

    /// Start collection for every configured exchange.
    ///
    /// Idempotent while Running. Startup is fatal only when the admin
    /// identity cannot be resolved or no handler starts at all; a single
    /// failing exchange just keeps reconnecting in the background.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_running() {
            debug!("start ignored, daemon already running");
            return Ok(());
        }

        self.set_status(DaemonStatus::Starting);
        info!(admin = %self.config.admin_mail, "starting ticker daemon");

        match self.start_collection().await {
            Ok(started) => {
                self.set_status(DaemonStatus::Running);
                info!(exchanges = started, "ticker daemon running");
                Ok(())
            }
            Err(e) => {
                self.set_status(DaemonStatus::Error);
                error!(error = %e, "ticker daemon failed to start");
                Err(e)
            }
        }
    }

    async fn start_collection(&self) -> Result<usize> {
        let _ = self.shutdown_tx.send(false);

        // One bulk symbol read, filtered in memory per exchange. Never
        // replace this with per-exchange lookups.
        let topology = load_desired_topology(&*self.deps.config_store, &self.config.admin_mail)
            .await
            .map_err(|e| TickerError::Startup(e.to_string()))?;

        if topology.accounts.is_empty() {
            return Err(TickerError::Startup(format!(
                "no exchanges configured for {}",
                self.config.admin_mail
            )));
        }

        let builder = self.builder();
        let mut pending: Vec<(String, usize, ExchangeHandler)> = Vec::new();

        for (account, name) in topology.accounts {
            let symbols = topology
                .symbols_by_exchange
                .get(&name)
                .cloned()
                .unwrap_or_default();
            if symbols.is_empty() {
                warn!(exchange = %name, "no symbols configured, handler not created");
                continue;
            }
            let handler = builder.build(account, &name, symbols.iter().cloned());
            pending.push((name, symbols.len(), handler));
        }

        // Handlers start concurrently; one slow exchange must not delay
        // the others.
        let results = futures::future::join_all(
            pending.iter().map(|(_, _, handler)| handler.start()),
        )
        .await;

        let mut started = 0usize;
        for ((name, symbol_count, handler), result) in pending.iter().zip(results) {
            match result {
                Ok(()) => {
                    started += 1;
                    self.health
                        .sync_subscriptions(name, &handler.subscribed_symbols())
                        .await;
                    info!(exchange = %name, symbols = symbol_count, "handler started");
                }
                Err(e) => {
                    error!(
                        exchange = %name,
                        error = %e,
                        "handler failed to start, reconnection scheduled"
                    );
                }
            }
            self.manager.set_active_symbols(name, *symbol_count);
        }

        {
            let mut handlers = self.handlers.write().await;
            for (name, _, handler) in pending {
                handlers.insert(name, handler);
            }
        }

        if started == 0 {
            self.stop_handlers().await;
            return Err(TickerError::Startup(
                "no exchange handlers started successfully".to_string(),
            ));
        }

        if let Err(e) = self
            .health
            .register_daemon(json!({
                "admin": self.config.admin_mail,
                "pid": std::process::id(),
            }))
            .await
        {
            warn!(error = %e, "daemon health registration failed");
        }

        self.spawn_background_tasks(true);
        Ok(started)
    }

    /// Stop all background tasks and handlers, deregister health.
    /// Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.status() == DaemonStatus::Stopped {
            return Ok(());
        }

        self.set_status(DaemonStatus::Stopping);
        info!("stopping ticker daemon");

        let _ = self.shutdown_tx.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "background task join failed");
            }
        }

        self.stop_handlers().await;

        if let Err(e) = self.health.deregister_daemon().await {
            warn!(error = %e, "daemon health deregistration failed");
        }

        self.set_status(DaemonStatus::Stopped);
        info!("ticker daemon stopped");
        Ok(())
    }

    /// Stop, brief pause, start.
    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.start().await
    }

    /// Manually trigger one symbol refresh iteration.
    pub async fn refresh_symbols(&self) -> Result<()> {
        refresh::refresh_symbols(
            &*self.deps.config_store,
            &self.manager,
            &self.health,
            &self.handlers,
            &self.config.admin_mail,
        )
        .await
    }

    /// Aggregate daemon, handler and manager health.
    pub async fn health(&self) -> DaemonHealth {
        let mut exchanges = HashMap::new();
        for (name, handler) in self.handlers.read().await.iter() {
            exchanges.insert(
                name.clone(),
                HandlerHealth {
                    connected: handler.is_connected(),
                    state: handler.status().to_string(),
                    last_event_time: handler.last_event_time(),
                    reconnect_count: handler.reconnect_count(),
                },
            );
        }
        DaemonHealth {
            status: self.status().to_string(),
            running: self.is_running(),
            exchanges,
            ticker_stats: self.manager.stats(),
        }
    }

    /// Single-symbol convenience entry.
    ///
    /// Running: the symbol is added to its exchange's handler, creating
    /// the handler on the fly if the exchange has none. Stopped: a minimal
    /// instance is started that collects only this symbol. Any other
    /// status is refused; mid-transition reconciliation guesses wrong.
    pub async fn process_ticker(&self, symbol: &SymbolDescriptor) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        match self.status() {
            DaemonStatus::Running => self.add_symbol_to_running(symbol).await,
            DaemonStatus::Stopped => self.start_single_symbol(symbol).await,
            status => Err(TickerError::InconsistentState(format!(
                "cannot process ticker while daemon is {}",
                status
            ))),
        }
    }

    async fn add_symbol_to_running(&self, symbol: &SymbolDescriptor) -> Result<()> {
        let existing = self
            .handlers
            .read()
            .await
            .get(&symbol.exchange_name)
            .cloned();

        if let Some(handler) = existing {
            let mut desired = handler.intended_symbols();
            if !desired.insert(symbol.symbol.clone()) {
                debug!(symbol = %symbol.symbol, "already collecting");
                return Ok(());
            }
            handler.update_symbols(desired.clone()).await?;
            self.health
                .sync_subscriptions(&symbol.exchange_name, &handler.subscribed_symbols())
                .await;
            self.manager
                .set_active_symbols(&symbol.exchange_name, desired.len());
            return Ok(());
        }

        info!(
            exchange = %symbol.exchange_name,
            symbol = %symbol.symbol,
            "spawning handler for new exchange"
        );
        let account = self.lookup_account(&symbol.exchange_name).await;
        let handler = self.builder().build(
            account,
            &symbol.exchange_name,
            [symbol.symbol.clone()],
        );
        let result = handler.start().await;
        self.health
            .sync_subscriptions(&symbol.exchange_name, &handler.subscribed_symbols())
            .await;
        self.manager.set_active_symbols(&symbol.exchange_name, 1);
        self.handlers
            .write()
            .await
            .insert(symbol.exchange_name.clone(), handler);
        result
    }

    async fn start_single_symbol(&self, symbol: &SymbolDescriptor) -> Result<()> {
        self.set_status(DaemonStatus::Starting);
        info!(
            exchange = %symbol.exchange_name,
            symbol = %symbol.symbol,
            "starting single-symbol collection"
        );

        let _ = self.shutdown_tx.send(false);
        let account = self.lookup_account(&symbol.exchange_name).await;
        let handler = self.builder().build(
            account,
            &symbol.exchange_name,
            [symbol.symbol.clone()],
        );

        match handler.start().await {
            Ok(()) => {
                self.health
                    .sync_subscriptions(&symbol.exchange_name, &handler.subscribed_symbols())
                    .await;
                self.manager.set_active_symbols(&symbol.exchange_name, 1);
                self.handlers
                    .write()
                    .await
                    .insert(symbol.exchange_name.clone(), handler);

                if let Err(e) = self
                    .health
                    .register_daemon(json!({
                        "admin": self.config.admin_mail,
                        "mode": "single_symbol",
                        "symbol": symbol.symbol,
                    }))
                    .await
                {
                    warn!(error = %e, "daemon health registration failed");
                }

                // No refresh loop: configuration would immediately widen
                // the symbol set again.
                self.spawn_background_tasks(false);
                self.set_status(DaemonStatus::Running);
                Ok(())
            }
            Err(e) => {
                self.set_status(DaemonStatus::Error);
                Err(e)
            }
        }
    }

    /// Find the admin account for an exchange, synthesizing one when the
    /// configuration store does not know it (ad-hoc symbols).
    async fn lookup_account(&self, exchange_name: &str) -> UserExchange {
        let from_config =
            load_desired_topology(&*self.deps.config_store, &self.config.admin_mail)
                .await
                .ok()
                .and_then(|topology| {
                    topology
                        .accounts
                        .into_iter()
                        .find(|(_, name)| name == exchange_name)
                        .map(|(account, _)| account)
                });
        from_config.unwrap_or_else(|| UserExchange {
            exchange_id: 0,
            category_id: 0,
            name: exchange_name.to_string(),
        })
    }

    fn spawn_background_tasks(&self, with_refresh: bool) {
        let mut tasks = vec![self.spawn_supervisor_loop(), self.spawn_heartbeat_loop()];
        if with_refresh {
            tasks.push(refresh::spawn_refresh_loop(
                self.deps.config_store.clone(),
                self.manager.clone(),
                self.health.clone(),
                self.handlers.clone(),
                self.config.admin_mail.clone(),
                Duration::from_secs(self.config.refresh.initial_delay_secs),
                Duration::from_secs(self.config.refresh.interval_secs),
                self.shutdown_tx.subscribe(),
            ));
        }
        *self.tasks.lock() = tasks;
    }

    /// Periodic sweep recreating handlers that went terminal. Bounded
    /// retry lives inside the handler; this layer just replaces corpses.
    fn spawn_supervisor_loop(&self) -> JoinHandle<()> {
        let handlers = self.handlers.clone();
        let builder = self.builder();
        let health = self.health.clone();
        let interval = Duration::from_secs(self.config.supervisor.interval_secs);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.wait_for(|stop| *stop) => return,
                }

                let snapshot: Vec<(String, ExchangeHandler)> = handlers
                    .read()
                    .await
                    .iter()
                    .map(|(name, handler)| (name.clone(), handler.clone()))
                    .collect();

                for (name, handler) in snapshot {
                    if handler.status() != ConnectionState::Error {
                        continue;
                    }
                    warn!(exchange = %name, "handler in terminal error, recreating");

                    let account = handler.account();
                    let symbols = handler.intended_symbols();
                    if let Err(e) = handler.stop().await {
                        debug!(exchange = %name, error = %e, "stopping dead handler failed");
                    }

                    let fresh = builder.build(account, &name, symbols);
                    if let Err(e) = fresh.start().await {
                        error!(
                            exchange = %name,
                            error = %e,
                            "recreated handler failed to start, reconnection scheduled"
                        );
                    }
                    health
                        .sync_subscriptions(&name, &fresh.subscribed_symbols())
                        .await;
                    handlers.write().await.insert(name, fresh);
                }
            }
        })
    }

    /// One-second heartbeat on the daemon health entry with aggregate
    /// statistics.
    fn spawn_heartbeat_loop(&self) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let health = self.health.clone();
        let handlers = self.handlers.clone();
        let interval = Duration::from_secs(self.config.supervisor.heartbeat_secs);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.wait_for(|stop| *stop) => return,
                }

                let stats = manager.stats();
                let exchange_count = handlers.read().await.len();
                let message = format!(
                    "ticks={} exchanges={} errors={}",
                    stats.total_tickers,
                    exchange_count,
                    stats.error_counts.values().sum::<u64>()
                );
                if let Err(e) = health.heartbeat(&message).await {
                    debug!(error = %e, "daemon heartbeat failed");
                }
            }
        })
    }

    async fn stop_handlers(&self) {
        let handlers: Vec<(String, ExchangeHandler)> =
            self.handlers.write().await.drain().collect();

        let health = self.health.clone();
        futures::future::join_all(handlers.into_iter().map(|(name, handler)| {
            let health = health.clone();
            async move {
                if let Err(e) = handler.stop().await {
                    warn!(exchange = %name, error = %e, "handler stop failed");
                }
                health.sync_subscriptions(&name, &HashSet::new()).await;
            }
        }))
        .await;
    }
}
