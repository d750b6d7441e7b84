//! Thin adapter that persists ticks into the shared cache.

use std::sync::Arc;
use types::Tick;

use crate::error::{Result, TickerError};

use super::TickStore;

/// Writes ticks to the tick store, mapping backend failures to
/// `CacheUnavailable` so callers can apply their own retry policy. The
/// writer never retries or blocks beyond the single store call.
#[derive(Clone)]
pub struct CacheWriter {
    store: Arc<dyn TickStore>,
}

impl CacheWriter {
    pub fn new(store: Arc<dyn TickStore>) -> Self {
        Self { store }
    }

    /// Store one tick, last-writer-wins per `(exchange, symbol)`.
    pub async fn put(&self, tick: &Tick) -> Result<()> {
        self.store
            .set_ticker(tick)
            .await
            .map_err(|e| TickerError::CacheUnavailable(e.to_string()))
    }

    /// Store a batch, coalesced into one backend operation when the store
    /// supports it.
    pub async fn put_batch(&self, ticks: &[Tick]) -> Result<()> {
        if ticks.is_empty() {
            return Ok(());
        }
        let result = if self.store.supports_batch() {
            self.store.set_tickers(ticks).await
        } else {
            async {
                for tick in ticks {
                    self.store.set_ticker(tick).await?;
                }
                Ok(())
            }
            .await
        };
        result.map_err(|e| TickerError::CacheUnavailable(e.to_string()))
    }
}
