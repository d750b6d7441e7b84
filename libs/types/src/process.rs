//! Process-health records stored in the shared process cache.
//!
//! The daemon registers one entry for itself and one per live subscription;
//! downstream monitors read them back through `active_processes`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a registered process entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Error,
    Stopped,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Error => "error",
            ProcessStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Kind of process being registered. The ticker engine only registers
/// tick collectors, but the store namespace is shared with other daemons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    Tick,
    Ohlcv,
    Account,
}

impl std::fmt::Display for ProcessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessType::Tick => "tick",
            ProcessType::Ohlcv => "ohlcv",
            ProcessType::Account => "account",
        };
        f.write_str(s)
    }
}

/// A registered process-health entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Store-assigned identifier.
    pub process_id: String,
    pub process_type: ProcessType,
    /// Component key, e.g. `"ticker_daemon"` or `"binance:BTC/USDT"`.
    pub component: String,
    /// Free-form parameters recorded at registration.
    pub params: Value,
    /// Last status message.
    pub message: String,
    pub status: ProcessStatus,
    /// Epoch seconds of the last update.
    pub last_update: f64,
}
