//! Cache-side output: the consumed tick and process-health store
//! capabilities plus the thin writer adapter in front of them.

pub mod cache_writer;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use types::{ProcessRecord, ProcessStatus, ProcessType, Tick};

use crate::error::Result;

pub use cache_writer::CacheWriter;
pub use memory::{MemoryProcessStore, MemoryTickStore};

/// The shared tick cache: latest [`Tick`] per `(exchange, symbol)` key,
/// last-writer-wins. Read by downstream services, written only through the
/// [`CacheWriter`].
#[async_trait]
pub trait TickStore: Send + Sync {
    /// Store a tick under its `(exchange, symbol)` key.
    async fn set_ticker(&self, tick: &Tick) -> Result<()>;

    /// Latest tick for one key, if any.
    async fn get_ticker(&self, exchange: &str, symbol: &str) -> Result<Option<Tick>>;

    /// Latest ticks for every symbol of one exchange.
    async fn get_tickers(&self, exchange: &str) -> Result<Vec<Tick>>;

    /// Latest ticks across all keys.
    async fn get_all_tickers(&self) -> Result<Vec<Tick>>;

    /// Whether [`TickStore::set_tickers`] is a true batch operation on the
    /// backend rather than a loop.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Store a batch of ticks. Default implementation loops over
    /// [`TickStore::set_ticker`].
    async fn set_tickers(&self, ticks: &[Tick]) -> Result<()> {
        for tick in ticks {
            self.set_ticker(tick).await?;
        }
        Ok(())
    }
}

/// The shared process-health store: one entry per registered component,
/// read back by monitors through [`ProcessStore::active_processes`].
#[async_trait]
pub trait ProcessStore: Send + Sync {
    /// Register a new process entry, returning its store-assigned id.
    async fn register_process(
        &self,
        process_type: ProcessType,
        component: &str,
        params: Value,
        message: &str,
        status: ProcessStatus,
    ) -> Result<String>;

    /// Update status and message of an existing entry.
    async fn update_process(
        &self,
        process_id: &str,
        status: ProcessStatus,
        message: &str,
    ) -> Result<()>;

    /// Delete every entry whose component matches `component` exactly,
    /// returning how many were removed.
    async fn delete_by_component(&self, component: &str) -> Result<u64>;

    /// All live entries.
    async fn active_processes(&self) -> Result<Vec<ProcessRecord>>;
}
