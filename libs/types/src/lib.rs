//! # Tickstream Types
//!
//! Shared data model for the ticker collection engine:
//!
//! - [`Tick`] — the canonical normalized price record, keyed by
//!   `(exchange, symbol)`. Immutable once built; the cache keeps only the
//!   most recent record per key.
//! - [`RawTickerEvent`] — the loosely-typed inbound record as delivered by
//!   exchange WebSocket clients. Numeric fields may arrive as JSON numbers
//!   or numeric strings; every field is optional. The normalizer in the
//!   service crate is the only place that tolerates this looseness.
//! - Configuration-store records ([`SymbolDescriptor`], [`UserExchange`],
//!   [`ExchangeCategory`]) — read-only views of the relational config store.
//! - Process-health records ([`ProcessRecord`], [`ProcessStatus`],
//!   [`ProcessType`]) — entries the engine registers and heartbeats in the
//!   shared process cache.
//!
//! Prices are `f64`: tickers are observational data, not accounting values,
//! and the upstream feeds themselves ship floats or decimal strings.

pub mod market;
pub mod process;

pub use market::{
    Credentials, ExchangeCategory, RawTickerEvent, SymbolDescriptor, Tick, UserExchange,
};
pub use process::{ProcessRecord, ProcessStatus, ProcessType};

/// Current wall-clock time as seconds since the Unix epoch with sub-second
/// precision, the timestamp convention used across the engine.
pub fn epoch_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
