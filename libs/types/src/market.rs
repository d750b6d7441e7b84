//! Market-data records: canonical ticks, raw inbound events, and the
//! read-only configuration-store views.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical normalized ticker record for one `(exchange, symbol)` pair.
///
/// Created by the normalizer from a [`RawTickerEvent`], never mutated, and
/// replaced in the cache by the next tick for the same key. `bid > ask` is
/// possible (exchanges occasionally cross) and is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Trading pair, e.g. `"BTC/USDT"`.
    pub symbol: String,
    /// Canonical exchange name, e.g. `"binance"`.
    pub exchange: String,
    /// Last traded price. Always present and finite.
    pub price: f64,
    /// Best bid, if the feed carries one.
    pub bid: Option<f64>,
    /// Best ask, if the feed carries one.
    pub ask: Option<f64>,
    /// Last trade price as reported; defaults to `price` at normalization.
    pub last: Option<f64>,
    /// Rolling volume, if the feed carries one.
    pub volume: Option<f64>,
    /// Absolute price change, if the feed carries one.
    pub change: Option<f64>,
    /// Percentage price change, if the feed carries one.
    pub percentage: Option<f64>,
    /// Event time, seconds since epoch with sub-second precision.
    pub time: f64,
}

impl Tick {
    /// Cache key for this tick.
    pub fn key(&self) -> (String, String) {
        (self.exchange.clone(), self.symbol.clone())
    }

    /// Age of this tick relative to `now` (epoch seconds). Never negative.
    pub fn age(&self, now: f64) -> f64 {
        (now - self.time).max(0.0)
    }

    /// Re-encode as a loose wire event.
    ///
    /// A tick that came out of the normalizer re-normalizes to an equal
    /// tick, modulo fields the original event never carried.
    pub fn to_raw(&self) -> RawTickerEvent {
        RawTickerEvent {
            symbol: Some(self.symbol.clone()),
            exchange: Some(self.exchange.clone()),
            price: Some(Value::from(self.price)),
            bid: self.bid.map(Value::from),
            ask: self.ask.map(Value::from),
            last: self.last.map(Value::from),
            volume: self.volume.map(Value::from),
            change: self.change.map(Value::from),
            percentage: self.percentage.map(Value::from),
            time: Some(Value::from(self.time)),
            timestamp: None,
        }
    }
}

/// Loosely-typed ticker event as received from an exchange WebSocket client.
///
/// Exchange feeds disagree on field names and types: prices arrive as JSON
/// numbers or as numeric strings, the event time may be under `time` or
/// `timestamp`, and most fields are optional. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTickerEvent {
    /// Trading pair.
    pub symbol: Option<String>,
    /// Exchange name as claimed by the event. The handler's own identity
    /// wins when they disagree.
    pub exchange: Option<String>,
    /// Price, as number or numeric string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<Value>,
    /// Last trade price; used as the price when `price` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<Value>,
    /// Event time in epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Value>,
    /// Alternate key some feeds use instead of `time`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

/// One configured symbol, as loaded from the configuration store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDescriptor {
    /// Trading pair, e.g. `"BTC/USDT"`.
    pub symbol: String,
    /// Exchange category this symbol belongs to.
    pub category_id: u32,
    /// Canonical name of the owning exchange.
    pub exchange_name: String,
}

impl SymbolDescriptor {
    pub fn new(symbol: impl Into<String>, category_id: u32, exchange_name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            category_id,
            exchange_name: exchange_name.into(),
        }
    }
}

/// One exchange account owned by a user, as loaded from the configuration
/// store. The engine only reads the admin identity's exchanges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserExchange {
    /// Row id of the user's exchange account.
    pub exchange_id: u32,
    /// Exchange category (resolves to the canonical name).
    pub category_id: u32,
    /// User-facing account name, e.g. `"binance-main"`.
    pub name: String,
}

/// An exchange category: the canonical identity of a venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeCategory {
    pub category_id: u32,
    /// Canonical exchange name, e.g. `"kraken"`.
    pub name: String,
}

/// API credentials resolved for one exchange account.
///
/// Public-data exchanges run without credentials; that is the empty pair,
/// not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    /// The empty credential pair used for public-only access.
    pub fn public() -> Self {
        Self::default()
    }

    pub fn is_public(&self) -> bool {
        self.key.is_empty() && self.secret.is_empty()
    }
}
