//! Centralized configuration for the ticker daemon.
//!
//! Configuration is a TOML file with environment-variable overrides applied
//! after parse, so deployments can ship one file and tune per host:
//!
//! ```toml
//! admin_mail = "admin@fullon"
//!
//! [refresh]
//! interval_secs = 300
//! initial_delay_secs = 10
//!
//! [supervisor]
//! interval_secs = 10
//! heartbeat_secs = 1
//!
//! [reconnect]
//! max_attempts = 10
//! max_backoff_secs = 60
//! ```
//!
//! Recognized environment overrides: `ADMIN_MAIL`,
//! `TICKER_SYMBOL_REFRESH_INTERVAL`, `CACHE_URL`, `DATABASE_URL`.

pub mod service;

pub use service::{ReconnectConfig, RefreshConfig, ServiceConfig, SupervisorConfig};
