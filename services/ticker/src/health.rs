//! Process-health reporting with per-subscription rate limiting.
//!
//! Two kinds of entries go to the process store: one for the daemon itself
//! (heartbeated every second by the supervisor) and one per live
//! `(exchange, symbol)` subscription. Subscription updates are capped at
//! one per 30 seconds per key to keep tick-rate traffic away from the
//! cache; the last-update clock for that cap lives in memory here.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use types::{epoch_now, ProcessStatus, ProcessType};

use crate::error::Result;
use crate::output::ProcessStore;

/// Minimum seconds between store updates for one subscription key.
pub const SUBSCRIPTION_UPDATE_INTERVAL_SECS: f64 = 30.0;

/// Component key of the daemon-level entry.
pub const DAEMON_COMPONENT: &str = "ticker_daemon";

struct SubscriptionEntry {
    process_id: String,
    last_update: f64,
}

/// Adapter over the process store for all health writes the engine makes.
pub struct HealthReporter {
    store: Arc<dyn ProcessStore>,
    daemon_id: Mutex<Option<String>>,
    subscriptions: DashMap<String, SubscriptionEntry>,
}

impl HealthReporter {
    pub fn new(store: Arc<dyn ProcessStore>) -> Self {
        Self {
            store,
            daemon_id: Mutex::new(None),
            subscriptions: DashMap::new(),
        }
    }

    fn key(exchange: &str, symbol: &str) -> String {
        format!("{}:{}", exchange, symbol)
    }

    /// Register the daemon-level entry. Called once per `start`.
    pub async fn register_daemon(&self, params: Value) -> Result<()> {
        let id = self
            .store
            .register_process(
                ProcessType::Tick,
                DAEMON_COMPONENT,
                params,
                "Started",
                ProcessStatus::Starting,
            )
            .await?;
        *self.daemon_id.lock() = Some(id);
        Ok(())
    }

    /// Heartbeat the daemon entry with current aggregate statistics.
    pub async fn heartbeat(&self, message: &str) -> Result<()> {
        let id = self.daemon_id.lock().clone();
        if let Some(id) = id {
            self.store
                .update_process(&id, ProcessStatus::Running, message)
                .await?;
        }
        Ok(())
    }

    /// Remove the daemon entry. Called on `stop`.
    pub async fn deregister_daemon(&self) -> Result<()> {
        *self.daemon_id.lock() = None;
        self.store.delete_by_component(DAEMON_COMPONENT).await?;
        Ok(())
    }

    /// Whether a per-subscription entry exists for this key.
    pub fn tracks(&self, exchange: &str, symbol: &str) -> bool {
        self.subscriptions.contains_key(&Self::key(exchange, symbol))
    }

    /// Create the per-subscription entry after a successful subscribe.
    ///
    /// The entry starts with a zeroed update clock so the first delivered
    /// tick promotes it to Running immediately.
    pub async fn on_subscribed(&self, exchange: &str, symbol: &str) -> Result<()> {
        let key = Self::key(exchange, symbol);
        let process_id = self
            .store
            .register_process(
                ProcessType::Tick,
                &key,
                json!({
                    "exchange": exchange,
                    "symbol": symbol,
                    "type": "live_ticker",
                }),
                "Starting live ticker collection",
                ProcessStatus::Starting,
            )
            .await?;
        self.subscriptions.insert(
            key,
            SubscriptionEntry {
                process_id,
                last_update: 0.0,
            },
        );
        Ok(())
    }

    /// Delete the per-subscription entry after an unsubscribe.
    pub async fn on_unsubscribed(&self, exchange: &str, symbol: &str) -> Result<()> {
        let key = Self::key(exchange, symbol);
        self.subscriptions.remove(&key);
        self.store.delete_by_component(&key).await?;
        Ok(())
    }

    /// Mark the subscription Running if its rate-limit window has passed.
    /// Returns whether a store update was issued.
    pub async fn mark_running_if_due(
        &self,
        exchange: &str,
        symbol: &str,
        tick_time: f64,
    ) -> Result<bool> {
        self.mark_running_if_due_at(exchange, symbol, tick_time, epoch_now())
            .await
    }

    /// [`Self::mark_running_if_due`] with an explicit clock, for callers
    /// that already read it.
    pub async fn mark_running_if_due_at(
        &self,
        exchange: &str,
        symbol: &str,
        tick_time: f64,
        now: f64,
    ) -> Result<bool> {
        let key = Self::key(exchange, symbol);

        // Claim the window before awaiting so concurrent deliveries for the
        // same key cannot both pass the check.
        let process_id = {
            let Some(mut entry) = self.subscriptions.get_mut(&key) else {
                return Ok(false);
            };
            if now - entry.last_update < SUBSCRIPTION_UPDATE_INTERVAL_SECS {
                return Ok(false);
            }
            entry.last_update = now;
            entry.process_id.clone()
        };

        self.store
            .update_process(
                &process_id,
                ProcessStatus::Running,
                &format!("received tick at {}", tick_time),
            )
            .await?;
        Ok(true)
    }

    /// Reconcile tracked entries for one exchange against the set of
    /// symbols actually subscribed right now. Registers entries for new
    /// subscriptions and deletes entries whose subscription is gone;
    /// individual store failures are logged and skipped.
    pub async fn sync_subscriptions(
        &self,
        exchange: &str,
        current: &std::collections::HashSet<String>,
    ) {
        let prefix = format!("{}:", exchange);
        let tracked: Vec<String> = self
            .subscriptions
            .iter()
            .filter_map(|entry| entry.key().strip_prefix(&prefix).map(str::to_string))
            .collect();

        for symbol in &tracked {
            if !current.contains(symbol) {
                if let Err(e) = self.on_unsubscribed(exchange, symbol).await {
                    debug!(exchange = %exchange, symbol = %symbol, error = %e, "health entry removal failed");
                }
            }
        }
        for symbol in current {
            if !tracked.iter().any(|t| t == symbol) {
                if let Err(e) = self.on_subscribed(exchange, symbol).await {
                    debug!(exchange = %exchange, symbol = %symbol, error = %e, "health entry registration failed");
                }
            }
        }
    }

    /// Mark the subscription Error immediately (not rate-limited).
    pub async fn mark_error(&self, exchange: &str, symbol: &str, message: &str) -> Result<()> {
        let key = Self::key(exchange, symbol);
        let process_id = match self.subscriptions.get(&key) {
            Some(entry) => entry.process_id.clone(),
            None => {
                debug!(key = %key, "error for untracked subscription ignored");
                return Ok(());
            }
        };
        self.store
            .update_process(&process_id, ProcessStatus::Error, message)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemoryProcessStore;

    fn reporter() -> (Arc<MemoryProcessStore>, HealthReporter) {
        let store = Arc::new(MemoryProcessStore::new());
        let reporter = HealthReporter::new(store.clone());
        (store, reporter)
    }

    #[tokio::test]
    async fn daemon_entry_lifecycle() {
        let (store, reporter) = reporter();

        reporter.register_daemon(json!({"pid": 42})).await.unwrap();
        reporter.heartbeat("ticks=0").await.unwrap();

        let records = store.active_processes().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].component, DAEMON_COMPONENT);
        assert_eq!(records[0].status, ProcessStatus::Running);

        reporter.deregister_daemon().await.unwrap();
        assert!(store.active_processes().await.unwrap().is_empty());
        // Heartbeat after deregistration is a no-op, not an error.
        reporter.heartbeat("late").await.unwrap();
    }

    #[tokio::test]
    async fn first_tick_promotes_to_running() {
        let (store, reporter) = reporter();
        reporter.on_subscribed("binance", "BTC/USDT").await.unwrap();

        let updated = reporter
            .mark_running_if_due_at("binance", "BTC/USDT", 1000.0, 1000.0)
            .await
            .unwrap();
        assert!(updated);

        let records = store.active_processes().await.unwrap();
        assert_eq!(records[0].status, ProcessStatus::Running);
        assert!(records[0].message.contains("1000"));
    }

    #[tokio::test]
    async fn updates_are_rate_limited_per_key() {
        let (_, reporter) = reporter();
        reporter.on_subscribed("binance", "BTC/USDT").await.unwrap();
        reporter.on_subscribed("binance", "ETH/USDT").await.unwrap();

        let now = 1000.0;
        assert!(reporter
            .mark_running_if_due_at("binance", "BTC/USDT", now, now)
            .await
            .unwrap());
        // Within the window: silently skipped.
        assert!(!reporter
            .mark_running_if_due_at("binance", "BTC/USDT", now + 10.0, now + 10.0)
            .await
            .unwrap());
        assert!(!reporter
            .mark_running_if_due_at("binance", "BTC/USDT", now + 29.9, now + 29.9)
            .await
            .unwrap());
        // The other key has its own window.
        assert!(reporter
            .mark_running_if_due_at("binance", "ETH/USDT", now + 10.0, now + 10.0)
            .await
            .unwrap());
        // Window elapsed.
        assert!(reporter
            .mark_running_if_due_at("binance", "BTC/USDT", now + 30.0, now + 30.0)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn untracked_keys_are_ignored() {
        let (_, reporter) = reporter();
        assert!(!reporter
            .mark_running_if_due_at("binance", "BTC/USDT", 1.0, 1.0)
            .await
            .unwrap());
        reporter.mark_error("binance", "BTC/USDT", "boom").await.unwrap();
    }

    #[tokio::test]
    async fn error_marks_are_immediate() {
        let (store, reporter) = reporter();
        reporter.on_subscribed("binance", "BTC/USDT").await.unwrap();
        reporter
            .mark_running_if_due_at("binance", "BTC/USDT", 1.0, 1000.0)
            .await
            .unwrap();

        reporter
            .mark_error("binance", "BTC/USDT", "delivery failed")
            .await
            .unwrap();
        let records = store.active_processes().await.unwrap();
        assert_eq!(records[0].status, ProcessStatus::Error);
    }

    #[tokio::test]
    async fn sync_reconciles_tracked_entries() {
        let (store, reporter) = reporter();
        reporter.on_subscribed("binance", "BTC/USDT").await.unwrap();
        reporter.on_subscribed("binance", "ETH/USDT").await.unwrap();
        reporter.on_subscribed("kraken", "BTC/USD").await.unwrap();

        let current: std::collections::HashSet<String> =
            ["BTC/USDT", "XRP/USDT"].iter().map(|s| s.to_string()).collect();
        reporter.sync_subscriptions("binance", &current).await;

        assert!(reporter.tracks("binance", "BTC/USDT"));
        assert!(reporter.tracks("binance", "XRP/USDT"));
        assert!(!reporter.tracks("binance", "ETH/USDT"));
        // Other exchanges are untouched.
        assert!(reporter.tracks("kraken", "BTC/USD"));

        let components: Vec<String> = store
            .active_processes()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.component)
            .collect();
        assert!(!components.contains(&"binance:ETH/USDT".to_string()));
        assert!(components.contains(&"binance:XRP/USDT".to_string()));
    }

    #[tokio::test]
    async fn unsubscribe_removes_entry_and_record() {
        let (store, reporter) = reporter();
        reporter.on_subscribed("binance", "BTC/USDT").await.unwrap();
        assert!(reporter.tracks("binance", "BTC/USDT"));

        reporter.on_unsubscribed("binance", "BTC/USDT").await.unwrap();
        assert!(!reporter.tracks("binance", "BTC/USDT"));
        assert!(store.active_processes().await.unwrap().is_empty());
    }
}
