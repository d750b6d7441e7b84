//! Tick normalization: the one place that tolerates loose inbound data.
//!
//! Every raw event from an exchange WebSocket client passes through
//! [`normalize`] before anything else sees it. The transform is pure:
//! no I/O, no state, one allocation for the returned [`Tick`].

use types::{epoch_now, RawTickerEvent, Tick};

use crate::error::{Result, TickerError};

/// Normalize a raw exchange event into a canonical [`Tick`].
///
/// `exchange` is the owning handler's canonical exchange name; it wins over
/// any contradicting value on the event. The wall clock is read only when
/// the event carries no time of its own.
pub fn normalize(event: RawTickerEvent, exchange: &str) -> Result<Tick> {
    normalize_at(event, exchange, epoch_now())
}

/// [`normalize`] with an explicit fallback timestamp, for callers that have
/// already read the clock.
pub fn normalize_at(event: RawTickerEvent, exchange: &str, now: f64) -> Result<Tick> {
    let malformed = |reason: &str| TickerError::MalformedTicker {
        exchange: exchange.to_string(),
        reason: reason.to_string(),
    };

    let symbol = match event.symbol {
        Some(ref s) if !s.is_empty() => s.clone(),
        _ => return Err(malformed("missing symbol")),
    };

    if let Some(ref claimed) = event.exchange {
        if claimed != exchange {
            tracing::debug!(
                claimed = %claimed,
                handler = %exchange,
                symbol = %symbol,
                "event claims a different exchange, using handler identity"
            );
        }
    }

    let last = parse_optional(event.last.as_ref(), &malformed, "last")?;

    // `last` stands in for a missing price; an event with neither is junk.
    let price = match parse_optional(event.price.as_ref(), &malformed, "price")? {
        Some(p) => p,
        None => last.ok_or_else(|| malformed("missing price and last"))?,
    };
    if !price.is_finite() {
        return Err(malformed("non-finite price"));
    }

    let time = match parse_optional(event.time.as_ref(), &malformed, "time")? {
        Some(t) => t,
        None => parse_optional(event.timestamp.as_ref(), &malformed, "timestamp")?.unwrap_or(now),
    };

    Ok(Tick {
        symbol,
        exchange: exchange.to_string(),
        price,
        bid: parse_optional(event.bid.as_ref(), &malformed, "bid")?,
        ask: parse_optional(event.ask.as_ref(), &malformed, "ask")?,
        last: Some(last.unwrap_or(price)),
        volume: parse_optional(event.volume.as_ref(), &malformed, "volume")?,
        change: parse_optional(event.change.as_ref(), &malformed, "change")?,
        percentage: parse_optional(event.percentage.as_ref(), &malformed, "percentage")?,
        time,
    })
}

/// Parse an optional numeric field that may arrive as a JSON number or a
/// numeric string. Absent stays absent; present-but-unparseable is an error.
fn parse_optional(
    value: Option<&serde_json::Value>,
    malformed: &impl Fn(&str) -> TickerError,
    field: &str,
) -> Result<Option<f64>> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .map(Some)
            .ok_or_else(|| malformed(&format!("non-finite {}", field))),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Some)
            .ok_or_else(|| malformed(&format!("unparseable {}: {:?}", field, s))),
        Some(other) => Err(malformed(&format!(
            "unexpected type for {}: {}",
            field, other
        ))),
    }
}
