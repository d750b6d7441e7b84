//! Periodic symbol refresh: reconciling live subscriptions with the
//! configuration store.
//!
//! Each iteration invalidates the store's read-through caches, takes a
//! single bulk symbol read, filters it in memory per exchange, and diffs
//! against each running handler. Per-exchange symbol lookups interleaved
//! with cache invalidation are exactly how exchanges end up looking empty
//! mid-refresh; bulk-read-then-filter is load-bearing here, not a style
//! choice.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::{epoch_now, UserExchange};

use crate::error::{Result, TickerError};
use crate::health::HealthReporter;
use crate::input::ExchangeHandler;
use crate::manager::TickerManager;
use crate::store::ConfigStore;

/// Shared map of running handlers, keyed by canonical exchange name.
pub type HandlerMap = Arc<tokio::sync::RwLock<HashMap<String, ExchangeHandler>>>;

/// The admin identity's configured topology: exchange accounts with their
/// canonical names, and the desired symbol set per canonical name.
#[derive(Debug, Default)]
pub struct DesiredTopology {
    /// Exchange accounts paired with their canonical exchange name.
    pub accounts: Vec<(UserExchange, String)>,
    /// Desired symbols per canonical exchange name.
    pub symbols_by_exchange: HashMap<String, HashSet<String>>,
}

/// Load the admin topology with a single bulk symbol read.
///
/// The symbol list is fetched once and filtered in memory per exchange;
/// callers must not replace this with per-exchange store lookups.
pub async fn load_desired_topology(
    config: &dyn ConfigStore,
    admin_mail: &str,
) -> Result<DesiredTopology> {
    let user_id = config
        .get_user_id(admin_mail)
        .await?
        .ok_or_else(|| TickerError::ConfigUnavailable(format!("admin user not found: {}", admin_mail)))?;

    let exchanges = config.get_user_exchanges(user_id).await?;
    let categories = config.get_exchange_categories(true).await?;
    let all_symbols = config.get_symbols(true).await?;
    debug!(
        exchanges = exchanges.len(),
        symbols = all_symbols.len(),
        "bulk loaded configuration"
    );

    let names_by_category: HashMap<u32, String> = categories
        .into_iter()
        .map(|c| (c.category_id, c.name))
        .collect();

    let mut topology = DesiredTopology::default();
    for account in exchanges {
        let Some(name) = names_by_category.get(&account.category_id) else {
            warn!(
                account = %account.name,
                category_id = account.category_id,
                "no exchange category for account, skipping"
            );
            continue;
        };
        topology.accounts.push((account, name.clone()));
        topology
            .symbols_by_exchange
            .entry(name.clone())
            .or_default();
    }

    for symbol in all_symbols {
        if let Some(desired) = topology.symbols_by_exchange.get_mut(&symbol.exchange_name) {
            desired.insert(symbol.symbol);
        }
    }

    Ok(topology)
}

/// One refresh iteration over every running handler.
///
/// A failing exchange never aborts the others; the loop itself never
/// terminates the daemon.
pub async fn refresh_symbols(
    config: &dyn ConfigStore,
    manager: &TickerManager,
    health: &HealthReporter,
    handlers: &HandlerMap,
    admin_mail: &str,
) -> Result<()> {
    // Stale cache entries must never survive into the bulk read.
    config.invalidate_caches().await;
    let topology = load_desired_topology(config, admin_mail).await?;

    let snapshot: Vec<(String, ExchangeHandler)> = handlers
        .read()
        .await
        .iter()
        .map(|(name, handler)| (name.clone(), handler.clone()))
        .collect();

    for (name, handler) in &snapshot {
        let desired = topology
            .symbols_by_exchange
            .get(name)
            .cloned()
            .unwrap_or_default();
        manager.set_active_symbols(name, desired.len());

        if let Err(e) = handler.update_symbols(desired).await {
            error!(exchange = %name, error = %e, "symbol refresh failed for exchange");
            continue;
        }
        health
            .sync_subscriptions(name, &handler.subscribed_symbols())
            .await;
    }

    let known: HashSet<&String> = snapshot.iter().map(|(name, _)| name).collect();
    for name in topology.symbols_by_exchange.keys() {
        if !known.contains(name) {
            info!(
                exchange = %name,
                "new exchange in configuration; restart the daemon to collect it"
            );
        }
    }

    manager.record_refresh(epoch_now());
    Ok(())
}

/// Spawn the periodic refresh task: initial delay, then one iteration per
/// interval until shutdown.
pub fn spawn_refresh_loop(
    config: Arc<dyn ConfigStore>,
    manager: Arc<TickerManager>,
    health: Arc<HealthReporter>,
    handlers: HandlerMap,
    admin_mail: String,
    initial_delay: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(initial_delay) => {}
            _ = shutdown.wait_for(|stop| *stop) => return,
        }

        loop {
            if let Err(e) =
                refresh_symbols(&*config, &manager, &health, &handlers, &admin_mail).await
            {
                warn!(error = %e, "symbol refresh iteration failed, retrying next cycle");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.wait_for(|stop| *stop) => return,
            }
        }
    })
}
