//! Central tick fan-in: every handler's delivery callback lands here.
//!
//! The manager validates ticks, writes them through the [`CacheWriter`],
//! and keeps the per-exchange counters the daemon reports: tick counts,
//! error and recovery counts, last-seen times, and a bounded window of
//! per-tick processing latencies. Read operations are thin pass-throughs
//! to the tick store for observability callers.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use types::{epoch_now, Tick};

use crate::error::{Result, TickerError};
use crate::health::HealthReporter;
use crate::output::{CacheWriter, TickStore};

/// Cap on the per-exchange latency sample window.
pub const LATENCY_WINDOW: usize = 1000;

/// Default attempts for [`TickerManager::on_tick_with_retry`].
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Aggregate statistics for health display.
#[derive(Debug, Clone, Serialize)]
pub struct TickerStats {
    /// Ticks processed per exchange.
    pub ticker_counts: HashMap<String, u64>,
    /// Ticks processed across all exchanges.
    pub total_tickers: u64,
    /// Cache-write failures per exchange.
    pub error_counts: HashMap<String, u64>,
    /// Successful retry recoveries per exchange.
    pub recovery_counts: HashMap<String, u64>,
    /// Symbols currently configured per exchange.
    pub active_symbols: HashMap<String, usize>,
    /// Last tick time per exchange, epoch seconds.
    pub last_seen: HashMap<String, f64>,
    /// Last symbol refresh, epoch seconds.
    pub last_refresh: Option<f64>,
    /// Median processing latency over all current samples, milliseconds.
    pub latency_p50_ms: Option<f64>,
    /// 99th-percentile processing latency, milliseconds.
    pub latency_p99_ms: Option<f64>,
}

/// Per-exchange performance snapshot over the current latency window.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeMetrics {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p99_ms: f64,
    pub total_processed: u64,
    pub error_count: u64,
    pub recovery_count: u64,
}

/// Outcome of a validated batch submission.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    /// Items written to the cache.
    pub processed: usize,
    /// Items rejected or lost to a write failure.
    pub failed: usize,
    /// One description per failed item.
    pub errors: Vec<String>,
}

pub struct TickerManager {
    writer: CacheWriter,
    store: Arc<dyn TickStore>,
    health: Arc<HealthReporter>,

    tick_counts: DashMap<String, u64>,
    error_counts: DashMap<String, u64>,
    recovery_counts: DashMap<String, u64>,
    last_seen: DashMap<String, f64>,
    latencies: DashMap<String, VecDeque<f64>>,
    active_symbols: DashMap<String, usize>,
    last_refresh: RwLock<Option<f64>>,
}

impl TickerManager {
    pub fn new(store: Arc<dyn TickStore>, health: Arc<HealthReporter>) -> Self {
        Self {
            writer: CacheWriter::new(store.clone()),
            store,
            health,
            tick_counts: DashMap::new(),
            error_counts: DashMap::new(),
            recovery_counts: DashMap::new(),
            last_seen: DashMap::new(),
            latencies: DashMap::new(),
            active_symbols: DashMap::new(),
            last_refresh: RwLock::new(None),
        }
    }

    /// Process one tick from an exchange handler.
    ///
    /// Invalid ticks are logged and dropped without touching counters.
    /// A failed cache write increments the exchange's error count and
    /// propagates to the caller, which treats it as a delivery-path
    /// failure — never a connection problem.
    pub async fn on_tick(&self, exchange: &str, tick: Tick) -> Result<()> {
        if !Self::validate(&tick) {
            warn!(exchange = %exchange, "invalid tick received, skipping");
            return Ok(());
        }

        let started = Instant::now();

        if let Err(e) = self.writer.put(&tick).await {
            *self.error_counts.entry(exchange.to_string()).or_insert(0) += 1;
            return Err(e);
        }

        *self.tick_counts.entry(exchange.to_string()).or_insert(0) += 1;
        self.last_seen.insert(exchange.to_string(), epoch_now());
        self.record_latency(exchange, elapsed_ms(started));

        if let Err(e) = self
            .health
            .mark_running_if_due(exchange, &tick.symbol, tick.time)
            .await
        {
            debug!(exchange = %exchange, error = %e, "health update skipped");
        }

        debug!(
            exchange = %exchange,
            symbol = %tick.symbol,
            price = tick.price,
            "tick processed"
        );
        Ok(())
    }

    /// [`Self::on_tick`] with exponential-backoff retries on an
    /// unavailable cache. The first successful retry counts as a recovery.
    pub async fn on_tick_with_retry(
        &self,
        exchange: &str,
        tick: Tick,
        max_attempts: u32,
    ) -> Result<()> {
        let max_attempts = max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.on_tick(exchange, tick.clone()).await {
                Ok(()) => {
                    if attempt > 1 {
                        *self
                            .recovery_counts
                            .entry(exchange.to_string())
                            .or_insert(0) += 1;
                        info!(exchange = %exchange, attempt, "cache write recovered");
                    }
                    return Ok(());
                }
                Err(TickerError::CacheUnavailable(reason)) if attempt < max_attempts => {
                    let delay = Duration::from_secs(1 << attempt);
                    warn!(
                        exchange = %exchange,
                        attempt,
                        delay_secs = delay.as_secs(),
                        reason = %reason,
                        "cache unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(TickerError::CacheUnavailable(format!(
            "gave up after {} attempts",
            max_attempts
        )))
    }

    /// Batch submission; per-element semantics of [`Self::on_tick`] with
    /// the cache write coalesced when the backend supports batches.
    /// Returns how many ticks were written.
    pub async fn on_tick_batch(&self, exchange: &str, ticks: Vec<Tick>) -> Result<usize> {
        let valid: Vec<Tick> = ticks
            .into_iter()
            .filter(|tick| {
                let ok = Self::validate(tick);
                if !ok {
                    warn!(exchange = %exchange, "invalid tick in batch, skipping");
                }
                ok
            })
            .collect();

        if valid.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        if let Err(e) = self.writer.put_batch(&valid).await {
            *self.error_counts.entry(exchange.to_string()).or_insert(0) += valid.len() as u64;
            return Err(e);
        }

        let count = valid.len();
        *self.tick_counts.entry(exchange.to_string()).or_insert(0) += count as u64;
        self.last_seen.insert(exchange.to_string(), epoch_now());
        self.record_latency(exchange, elapsed_ms(started) / count as f64);

        for tick in &valid {
            if let Err(e) = self
                .health
                .mark_running_if_due(exchange, &tick.symbol, tick.time)
                .await
            {
                debug!(exchange = %exchange, error = %e, "health update skipped");
            }
        }

        Ok(count)
    }

    /// Batch submission reporting per-item outcomes instead of failing
    /// fast. Never returns an error; everything is in the result.
    pub async fn on_tick_batch_with_validation(
        &self,
        exchange: &str,
        ticks: Vec<Tick>,
    ) -> BatchResult {
        let mut result = BatchResult::default();
        let mut valid = Vec::with_capacity(ticks.len());

        for (index, tick) in ticks.into_iter().enumerate() {
            if Self::validate(&tick) {
                valid.push(tick);
            } else {
                result.failed += 1;
                result
                    .errors
                    .push(format!("item {}: missing symbol or price", index));
            }
        }

        if valid.is_empty() {
            return result;
        }

        match self.on_tick_batch(exchange, valid.clone()).await {
            Ok(count) => result.processed += count,
            Err(e) => {
                result.failed += valid.len();
                for tick in &valid {
                    result
                        .errors
                        .push(format!("{}: {}", tick.symbol, e));
                }
            }
        }

        result
    }

    /// Latest tick for one `(exchange, symbol)` key.
    pub async fn get_ticker(&self, exchange: &str, symbol: &str) -> Result<Option<Tick>> {
        self.store.get_ticker(exchange, symbol).await
    }

    /// Latest ticks for one exchange.
    pub async fn get_tickers(&self, exchange: &str) -> Result<Vec<Tick>> {
        self.store.get_tickers(exchange).await
    }

    /// Latest tick per exchange for one symbol. Full scan; observability
    /// use only, not a hot path.
    pub async fn get_symbol_tickers(&self, symbol: &str) -> Result<Vec<Tick>> {
        Ok(self
            .store
            .get_all_tickers()
            .await?
            .into_iter()
            .filter(|tick| tick.symbol == symbol)
            .collect())
    }

    /// Ticks younger than `max_age_seconds`. Full scan; observability use
    /// only, not a hot path.
    pub async fn get_fresh_tickers(&self, max_age_seconds: f64) -> Result<Vec<Tick>> {
        let now = epoch_now();
        Ok(self
            .store
            .get_all_tickers()
            .await?
            .into_iter()
            .filter(|tick| tick.age(now) <= max_age_seconds)
            .collect())
    }

    /// Record a completed symbol refresh.
    pub fn record_refresh(&self, at: f64) {
        *self.last_refresh.write() = Some(at);
    }

    /// Record how many symbols one exchange currently covers.
    pub fn set_active_symbols(&self, exchange: &str, count: usize) {
        self.active_symbols.insert(exchange.to_string(), count);
    }

    /// Current number of latency samples held for one exchange.
    pub fn latency_sample_count(&self, exchange: &str) -> usize {
        self.latencies
            .get(exchange)
            .map(|window| window.len())
            .unwrap_or(0)
    }

    /// Aggregate statistics for health display.
    pub fn stats(&self) -> TickerStats {
        let ticker_counts: HashMap<String, u64> = self
            .tick_counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        let total_tickers = ticker_counts.values().sum();

        let mut all_samples: Vec<f64> = Vec::new();
        for window in self.latencies.iter() {
            all_samples.extend(window.value().iter().copied());
        }
        all_samples.sort_by(|a, b| a.total_cmp(b));

        TickerStats {
            ticker_counts,
            total_tickers,
            error_counts: self
                .error_counts
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            recovery_counts: self
                .recovery_counts
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            active_symbols: self
                .active_symbols
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            last_seen: self
                .last_seen
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            last_refresh: *self.last_refresh.read(),
            latency_p50_ms: percentile(&all_samples, 50.0),
            latency_p99_ms: percentile(&all_samples, 99.0),
        }
    }

    /// Per-exchange latency and throughput snapshot.
    pub fn performance_metrics(&self) -> HashMap<String, ExchangeMetrics> {
        let mut metrics = HashMap::new();
        for entry in self.tick_counts.iter() {
            let exchange = entry.key().clone();
            let mut samples: Vec<f64> = self
                .latencies
                .get(&exchange)
                .map(|window| window.iter().copied().collect())
                .unwrap_or_default();
            samples.sort_by(|a, b| a.total_cmp(b));

            let avg = if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            };

            metrics.insert(
                exchange.clone(),
                ExchangeMetrics {
                    avg_ms: avg,
                    min_ms: samples.first().copied().unwrap_or(0.0),
                    max_ms: samples.last().copied().unwrap_or(0.0),
                    p50_ms: percentile(&samples, 50.0).unwrap_or(0.0),
                    p99_ms: percentile(&samples, 99.0).unwrap_or(0.0),
                    total_processed: *entry.value(),
                    error_count: self
                        .error_counts
                        .get(&exchange)
                        .map(|c| *c)
                        .unwrap_or(0),
                    recovery_count: self
                        .recovery_counts
                        .get(&exchange)
                        .map(|c| *c)
                        .unwrap_or(0),
                },
            );
        }
        metrics
    }

    fn validate(tick: &Tick) -> bool {
        !tick.symbol.is_empty() && !tick.exchange.is_empty() && tick.price.is_finite()
    }

    fn record_latency(&self, exchange: &str, millis: f64) {
        let mut window = self.latencies.entry(exchange.to_string()).or_default();
        window.push_back(millis);
        while window.len() > LATENCY_WINDOW {
            window.pop_front();
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted.get(rank.min(sorted.len() - 1)).copied()
}
