//! Daemon configuration: TOML file plus environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Email of the administrative identity whose exchanges and symbols the
    /// daemon collects.
    pub admin_mail: String,
    /// Connection string for the shared tick/process cache.
    pub cache_url: String,
    /// Connection string for the relational configuration store.
    pub database_url: String,
    pub refresh: RefreshConfig,
    pub supervisor: SupervisorConfig,
    pub reconnect: ReconnectConfig,
}

/// Symbol refresh loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Seconds between refresh iterations.
    pub interval_secs: u64,
    /// Seconds to wait after startup before the first iteration.
    pub initial_delay_secs: u64,
}

/// Supervisor loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Seconds between handler-restart sweeps.
    pub interval_secs: u64,
    /// Seconds between daemon health heartbeats.
    pub heartbeat_secs: u64,
}

/// Handler reconnection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Consecutive attempts before a handler gives up and goes terminal.
    pub max_attempts: u32,
    /// Cap on the exponential backoff delay.
    pub max_backoff_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            admin_mail: "admin@fullon".to_string(),
            cache_url: "redis://127.0.0.1:6379/0".to_string(),
            database_url: "postgresql://localhost/tickstream".to_string(),
            refresh: RefreshConfig::default(),
            supervisor: SupervisorConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            initial_delay_secs: 10,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            heartbeat_secs: 1,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_backoff_secs: 60,
        }
    }
}

impl ServiceConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn from_toml_with_env_overrides(path: &str) -> Result<Self> {
        let config_str =
            fs::read_to_string(path).with_context(|| format!("failed to read config file: {}", path))?;

        let mut config: ServiceConfig =
            toml::from_str(&config_str).context("failed to parse TOML configuration")?;

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for deployments without a file.
    pub fn from_env() -> Result<Self> {
        let mut config = ServiceConfig::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(mail) = lookup("ADMIN_MAIL") {
            self.admin_mail = mail;
        }
        if let Some(interval) = lookup("TICKER_SYMBOL_REFRESH_INTERVAL") {
            match interval.parse::<u64>() {
                Ok(secs) => self.refresh.interval_secs = secs,
                Err(_) => tracing::warn!(
                    value = %interval,
                    "ignoring non-numeric TICKER_SYMBOL_REFRESH_INTERVAL"
                ),
            }
        }
        if let Some(url) = lookup("CACHE_URL") {
            self.cache_url = url;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
    }

    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.admin_mail.is_empty() {
            anyhow::bail!("admin_mail must not be empty");
        }
        if self.refresh.interval_secs == 0 {
            anyhow::bail!("refresh.interval_secs must be positive");
        }
        if self.supervisor.interval_secs == 0 || self.supervisor.heartbeat_secs == 0 {
            anyhow::bail!("supervisor intervals must be positive");
        }
        if self.reconnect.max_attempts == 0 {
            anyhow::bail!("reconnect.max_attempts must be positive");
        }
        Ok(())
    }
}
