//! In-memory store backends.
//!
//! Process-local implementations of the cache capabilities, used by the
//! demo binary and the test suites. Deployments against a shared cache
//! provide their own [`TickStore`]/[`ProcessStore`] implementations.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use types::{epoch_now, ProcessRecord, ProcessStatus, ProcessType, Tick};

use crate::error::{Result, TickerError};

use super::{ProcessStore, TickStore};

/// Concurrent map of latest tick per `(exchange, symbol)`.
#[derive(Default)]
pub struct MemoryTickStore {
    ticks: DashMap<(String, String), Tick>,
}

impl MemoryTickStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

#[async_trait]
impl TickStore for MemoryTickStore {
    async fn set_ticker(&self, tick: &Tick) -> Result<()> {
        self.ticks.insert(tick.key(), tick.clone());
        Ok(())
    }

    async fn get_ticker(&self, exchange: &str, symbol: &str) -> Result<Option<Tick>> {
        Ok(self
            .ticks
            .get(&(exchange.to_string(), symbol.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn get_tickers(&self, exchange: &str) -> Result<Vec<Tick>> {
        Ok(self
            .ticks
            .iter()
            .filter(|entry| entry.key().0 == exchange)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_all_tickers(&self) -> Result<Vec<Tick>> {
        Ok(self.ticks.iter().map(|entry| entry.value().clone()).collect())
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn set_tickers(&self, ticks: &[Tick]) -> Result<()> {
        for tick in ticks {
            self.ticks.insert(tick.key(), tick.clone());
        }
        Ok(())
    }
}

/// Concurrent map of process-health entries keyed by process id.
#[derive(Default)]
pub struct MemoryProcessStore {
    records: DashMap<String, ProcessRecord>,
    next_id: AtomicU64,
}

impl MemoryProcessStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessStore for MemoryProcessStore {
    async fn register_process(
        &self,
        process_type: ProcessType,
        component: &str,
        params: Value,
        message: &str,
        status: ProcessStatus,
    ) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let process_id = format!("{}:{}", process_type, id);
        self.records.insert(
            process_id.clone(),
            ProcessRecord {
                process_id: process_id.clone(),
                process_type,
                component: component.to_string(),
                params,
                message: message.to_string(),
                status,
                last_update: epoch_now(),
            },
        );
        Ok(process_id)
    }

    async fn update_process(
        &self,
        process_id: &str,
        status: ProcessStatus,
        message: &str,
    ) -> Result<()> {
        let mut record = self
            .records
            .get_mut(process_id)
            .ok_or_else(|| TickerError::CacheUnavailable(format!("unknown process {}", process_id)))?;
        record.status = status;
        record.message = message.to_string();
        record.last_update = epoch_now();
        Ok(())
    }

    async fn delete_by_component(&self, component: &str) -> Result<u64> {
        let before = self.records.len();
        self.records.retain(|_, record| record.component != component);
        Ok((before - self.records.len()) as u64)
    }

    async fn active_processes(&self) -> Result<Vec<ProcessRecord>> {
        Ok(self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn tick_store_keys_by_exchange_and_symbol() {
        let store = MemoryTickStore::new();
        let mut tick = Tick {
            symbol: "BTC/USDT".to_string(),
            exchange: "binance".to_string(),
            price: 1.0,
            bid: None,
            ask: None,
            last: Some(1.0),
            volume: None,
            change: None,
            percentage: None,
            time: 1.0,
        };
        store.set_ticker(&tick).await.unwrap();
        tick.exchange = "kraken".to_string();
        store.set_ticker(&tick).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get_tickers("binance").await.unwrap().len(), 1);
        assert!(store
            .get_ticker("kraken", "BTC/USDT")
            .await
            .unwrap()
            .is_some());
        assert!(store.get_ticker("kraken", "ETH/USDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn process_store_lifecycle() {
        let store = MemoryProcessStore::new();
        let id = store
            .register_process(
                ProcessType::Tick,
                "binance:BTC/USDT",
                json!({"exchange": "binance"}),
                "Starting",
                ProcessStatus::Starting,
            )
            .await
            .unwrap();

        store
            .update_process(&id, ProcessStatus::Running, "Received ticker")
            .await
            .unwrap();

        let records = store.active_processes().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ProcessStatus::Running);

        assert_eq!(store.delete_by_component("binance:BTC/USDT").await.unwrap(), 1);
        assert!(store.active_processes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn updating_unknown_process_fails() {
        let store = MemoryProcessStore::new();
        assert!(store
            .update_process("tick:999", ProcessStatus::Running, "msg")
            .await
            .is_err());
    }
}
