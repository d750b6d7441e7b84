//! Exchange-side input: the consumed WebSocket capability and the
//! per-exchange handlers built on top of it.

pub mod handler;
pub mod sim;
pub mod subscriptions;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use types::{Credentials, RawTickerEvent, Tick, UserExchange};

use crate::error::Result;

pub use handler::ExchangeHandler;
pub use sim::{SimConnector, SimConnectorFactory};
pub use subscriptions::SubscriptionRegistry;

/// Connection states for one exchange handler's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Attempting the initial connect+subscribe sequence
    Connecting,
    /// Connected and receiving events
    Connected,
    /// Lost the connection, retrying with backoff
    Reconnecting,
    /// Retry budget exhausted; supervisor intervention required
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Opaque handle for one live ticker subscription, as issued by the
/// underlying WebSocket client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    /// Client-assigned subscription id
    pub id: u64,
    /// Symbol the subscription covers
    pub symbol: String,
}

/// Callback invoked by the WebSocket client for each raw ticker event.
pub type EventCallback = Arc<dyn Fn(RawTickerEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback invoked by the WebSocket client when its connection status
/// changes (`true` = connected, `false` = lost).
pub type StatusCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Callback a handler invokes for each normalized tick. Errors are logged
/// by the handler and never affect its connection state.
pub type TickCallback =
    Arc<dyn Fn(Tick) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// The consumed WebSocket client capability: one live connection to one
/// exchange, speaking that exchange's wire protocol.
///
/// Implementations own all protocol details; the engine only connects,
/// subscribes, and receives already-parsed exchange-native events through
/// the per-subscription callback. Callbacks may be invoked on any task the
/// client chooses.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Establish the connection.
    async fn connect(&self) -> Result<()>;

    /// Tear the connection down. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    /// Subscribe to ticker events for one symbol. The returned handle is
    /// required to unsubscribe later.
    async fn subscribe_ticker(
        &self,
        symbol: &str,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle>;

    /// Cancel one subscription.
    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()>;

    /// Install a connection-status callback. Optional; clients that cannot
    /// signal disconnects simply never call it.
    fn set_status_callback(&self, _callback: StatusCallback) {}
}

/// Produces a connector for one exchange account with resolved credentials.
/// The daemon holds one factory and builds a connector per handler.
pub trait ConnectorFactory: Send + Sync {
    fn connector(
        &self,
        exchange: &UserExchange,
        canonical_name: &str,
        credentials: &Credentials,
    ) -> Arc<dyn ExchangeConnector>;
}
