//! Error types for the ticker collection engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, TickerError>;

/// Main error type for the ticker collection engine
#[derive(Debug, Error)]
pub enum TickerError {
    /// Inbound event missing required fields or carrying unparseable numerics
    #[error("Malformed ticker from {exchange}: {reason}")]
    MalformedTicker {
        /// The exchange the event came from
        exchange: String,
        /// What was wrong with it
        reason: String,
    },

    /// Per-symbol subscribe operation failed
    #[error("Subscribe failed for {symbol} on {exchange}: {reason}")]
    SubscribeFailed {
        /// The exchange the subscription targeted
        exchange: String,
        /// The symbol that could not be subscribed
        symbol: String,
        /// Underlying failure
        reason: String,
    },

    /// Per-symbol unsubscribe operation failed
    #[error("Unsubscribe failed for {symbol} on {exchange}: {reason}")]
    UnsubscribeFailed {
        /// The exchange the subscription targeted
        exchange: String,
        /// The symbol that could not be unsubscribed
        symbol: String,
        /// Underlying failure
        reason: String,
    },

    /// Initial connect or post-disconnect reconnect failed
    #[error("Connection failed for {exchange}: {reason}")]
    ConnectFailed {
        /// The exchange that failed to connect
        exchange: String,
        /// Underlying failure
        reason: String,
    },

    /// Reconnection retry budget exhausted; handler is terminal
    #[error("Maximum reconnection attempts ({max_attempts}) exceeded for {exchange}")]
    MaxReconnectAttemptsExceeded {
        /// The exchange that failed to reconnect
        exchange: String,
        /// Attempts that were tried
        max_attempts: u32,
    },

    /// Credentials could not be resolved for an exchange account
    #[error("Credentials unavailable for {exchange}")]
    CredentialsUnavailable {
        /// The exchange account missing credentials
        exchange: String,
    },

    /// Tick-store or process-store write failed
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Configuration store could not be queried
    #[error("Configuration unavailable: {0}")]
    ConfigUnavailable(String),

    /// Operation refused because the daemon is mid-transition
    #[error("Inconsistent daemon state: {0}")]
    InconsistentState(String),

    /// Fatal startup failure (no admin identity, no exchanges, no symbols)
    #[error("Startup failed: {0}")]
    Startup(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TickerError {
    /// Check if this error is recoverable through retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TickerError::ConnectFailed { .. }
                | TickerError::SubscribeFailed { .. }
                | TickerError::UnsubscribeFailed { .. }
                | TickerError::CacheUnavailable(_)
                | TickerError::ConfigUnavailable(_)
        )
    }

    /// Check if this error indicates a permanent failure requiring
    /// supervisor intervention
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            TickerError::MaxReconnectAttemptsExceeded { .. } | TickerError::Startup(_)
        )
    }
}
