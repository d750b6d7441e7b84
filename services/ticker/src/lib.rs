//! # Ticker Service - Real-Time Market-Data Ingestion Engine
//!
//! ## Purpose
//!
//! Maintains live WebSocket subscriptions to a dynamic set of exchanges and
//! symbols, normalizes every inbound ticker event into a canonical [`Tick`],
//! and publishes the latest record per `(exchange, symbol)` into the shared
//! tick cache for downstream consumers (strategy engines, UIs, OHLCV
//! builders). Downstream services read the cache; nothing talks to an
//! exchange twice.
//!
//! ## Architecture Role
//!
//! ```text
//! Exchange WS ─┐
//! Exchange WS ─┼→ [ExchangeHandler] → normalize → [TickerManager] → [CacheWriter] → tick cache
//! Exchange WS ─┘        ↑                              │
//!        [TickerDaemon supervisor]              [HealthReporter] → process cache
//!                       ↑
//!            [Symbol Refresh Loop] ← configuration store
//! ```
//!
//! - One [`ExchangeHandler`] per exchange owns its connection, its
//!   subscription set and a bounded exponential-backoff reconnect loop.
//!   One exchange failing never touches the others.
//! - The [`TickerDaemon`] supervises: bulk-loads configuration at start,
//!   recreates handlers that went terminal, heartbeats the daemon health
//!   entry, and runs the periodic symbol refresh.
//! - External collaborators (WebSocket client, configuration store,
//!   credential resolver, tick and process caches) are capabilities
//!   injected at construction — no process-wide state.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ticker_service::{
//!     Dependencies, MemoryProcessStore, MemoryTickStore, PublicOnlyResolver,
//!     SimConnectorFactory, StaticConfigStore, TickerDaemon,
//! };
//!
//! # async fn run() -> ticker_service::Result<()> {
//! let daemon = TickerDaemon::new(
//!     config::ServiceConfig::default(),
//!     Dependencies {
//!         config_store: Arc::new(StaticConfigStore::demo("admin@fullon")),
//!         credential_resolver: Arc::new(PublicOnlyResolver),
//!         connector_factory: Arc::new(SimConnectorFactory::default()),
//!         tick_store: Arc::new(MemoryTickStore::new()),
//!         process_store: Arc::new(MemoryProcessStore::new()),
//!     },
//! );
//! daemon.start().await?;
//! let tick = daemon.manager().get_ticker("binance", "BTC/USDT").await?;
//! daemon.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod daemon;
pub mod error;
pub mod health;
pub mod input;
pub mod manager;
pub mod normalizer;
pub mod output;
pub mod refresh;
pub mod store;

pub use daemon::{DaemonHealth, DaemonStatus, Dependencies, HandlerHealth, TickerDaemon};
pub use error::{Result, TickerError};
pub use health::{HealthReporter, SUBSCRIPTION_UPDATE_INTERVAL_SECS};
pub use input::{
    ConnectionState, ConnectorFactory, EventCallback, ExchangeConnector, ExchangeHandler,
    SimConnector, SimConnectorFactory, StatusCallback, SubscriptionHandle, SubscriptionRegistry,
    TickCallback,
};
pub use manager::{
    BatchResult, ExchangeMetrics, TickerManager, TickerStats, DEFAULT_RETRY_ATTEMPTS,
    LATENCY_WINDOW,
};
pub use normalizer::{normalize, normalize_at};
pub use output::{
    CacheWriter, MemoryProcessStore, MemoryTickStore, ProcessStore, TickStore,
};
pub use refresh::{load_desired_topology, refresh_symbols, DesiredTopology, HandlerMap};
pub use store::{
    ConfigStore, CredentialResolver, EnvCredentialResolver, PublicOnlyResolver,
    StaticConfigStore, TopologyConfig, TopologyExchange,
};

// Re-export the data model for convenience.
pub use types::{Credentials, RawTickerEvent, SymbolDescriptor, Tick, UserExchange};
