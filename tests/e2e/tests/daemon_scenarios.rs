//! End-to-end scenarios: the daemon driven through scripted connectors
//! and in-memory cache backends.

use config::ServiceConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use ticker_e2e::{CountingConfigStore, ScriptedFactory};
use ticker_service::{
    DaemonStatus, Dependencies, MemoryProcessStore, MemoryTickStore, ProcessStore,
    PublicOnlyResolver, StaticConfigStore, TickerDaemon, TickerError,
};
use types::SymbolDescriptor;

struct Harness {
    daemon: TickerDaemon,
    factory: Arc<ScriptedFactory>,
    config_store: Arc<CountingConfigStore>,
    tick_store: Arc<MemoryTickStore>,
    process_store: Arc<MemoryProcessStore>,
}

fn harness(store: StaticConfigStore, mut config: ServiceConfig) -> Harness {
    config.admin_mail = "admin@fullon".to_string();
    let factory = Arc::new(ScriptedFactory::new());
    let config_store = Arc::new(CountingConfigStore::new(store));
    let tick_store = Arc::new(MemoryTickStore::new());
    let process_store = Arc::new(MemoryProcessStore::new());
    let daemon = TickerDaemon::new(
        config,
        Dependencies {
            config_store: config_store.clone(),
            credential_resolver: Arc::new(PublicOnlyResolver),
            connector_factory: factory.clone(),
            tick_store: tick_store.clone(),
            process_store: process_store.clone(),
        },
    );
    Harness {
        daemon,
        factory,
        config_store,
        tick_store,
        process_store,
    }
}

fn binance_store() -> StaticConfigStore {
    let store = StaticConfigStore::new("admin@fullon");
    store.add_exchange("binance", ["BTC/USDT", "ETH/USDT"]);
    store
}

#[tokio::test]
async fn delivered_event_lands_in_cache_with_parsed_fields() {
    let h = harness(binance_store(), ServiceConfig::default());
    h.daemon.start().await.unwrap();

    let connector = h.factory.get("binance");
    connector
        .push_json(
            "BTC/USDT",
            json!({
                "symbol": "BTC/USDT",
                "price": "50000.0",
                "bid": "49995",
                "ask": "50005",
                "volume": "10",
                "time": 1_700_000_000.0
            }),
        )
        .await;

    let tick = h
        .daemon
        .manager()
        .get_ticker("binance", "BTC/USDT")
        .await
        .unwrap()
        .expect("tick cached");
    assert_eq!(tick.price, 50000.0);
    assert_eq!(tick.bid, Some(49995.0));
    assert_eq!(tick.ask, Some(50005.0));
    assert_eq!(tick.volume, Some(10.0));
    assert_eq!(tick.time, 1_700_000_000.0);
    assert_eq!(tick.exchange, "binance");

    let stats = h.daemon.manager().stats();
    assert_eq!(stats.ticker_counts.get("binance"), Some(&1));

    h.daemon.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_event_is_dropped_entirely() {
    let h = harness(binance_store(), ServiceConfig::default());
    h.daemon.start().await.unwrap();

    let connector = h.factory.get("binance");
    // No price, no last: rejected by the normalizer.
    connector
        .push_json("BTC/USDT", json!({"symbol": "BTC/USDT"}))
        .await;

    assert_eq!(h.daemon.manager().stats().total_tickers, 0);
    assert!(h
        .daemon
        .manager()
        .get_ticker("binance", "BTC/USDT")
        .await
        .unwrap()
        .is_none());
    assert!(h.tick_store.is_empty());
    // The handler is still healthy and delivering.
    assert!(h.daemon.health().await.exchanges["binance"].connected);

    h.daemon.stop().await.unwrap();
}

#[tokio::test]
async fn startup_bulk_loads_symbols_exactly_once() {
    let store = StaticConfigStore::new("admin@fullon");
    for name in ["binance", "kraken", "bitstamp"] {
        let symbols: Vec<String> = (1..=5).map(|i| format!("SYM{}/USDT", i)).collect();
        store.add_exchange(name, symbols.iter().map(String::as_str));
    }
    let h = harness(store, ServiceConfig::default());

    h.daemon.start().await.unwrap();

    // One bulk read at startup, never one per exchange.
    assert_eq!(h.config_store.symbol_reads(), 1);
    assert_eq!(h.daemon.health().await.exchanges.len(), 3);

    h.daemon.stop().await.unwrap();
}

#[tokio::test]
async fn refresh_invalidates_then_applies_exact_diff() {
    let h = harness(binance_store(), ServiceConfig::default());
    h.daemon.start().await.unwrap();

    let connector = h.factory.get("binance");
    let baseline_reads = h.config_store.symbol_reads();

    h.config_store
        .inner()
        .set_symbols("binance", ["BTC/USDT", "XRP/USDT"]);
    h.daemon.refresh_symbols().await.unwrap();

    // Caches are invalidated before the single bulk read.
    assert!(h.config_store.invalidations() >= 1);
    assert_eq!(h.config_store.symbol_reads(), baseline_reads + 1);

    // Exactly one unsubscribe (ETH) and one new subscribe (XRP).
    let unsubscribed = connector.unsubscribe_calls();
    assert_eq!(unsubscribed.len(), 1);
    assert_eq!(unsubscribed[0].symbol, "ETH/USDT");
    let subscribes = connector.subscribe_calls();
    assert_eq!(
        subscribes.iter().filter(|s| s.as_str() == "XRP/USDT").count(),
        1
    );
    // BTC was untouched: still only the startup subscribe.
    assert_eq!(
        subscribes.iter().filter(|s| s.as_str() == "BTC/USDT").count(),
        1
    );

    let mut live = connector.subscribed_symbols();
    live.sort();
    assert_eq!(live, vec!["BTC/USDT".to_string(), "XRP/USDT".to_string()]);

    h.daemon.stop().await.unwrap();
}

#[tokio::test]
async fn one_exchange_failing_does_not_stop_the_others() {
    let store = StaticConfigStore::new("admin@fullon");
    store.add_exchange("binance", ["BTC/USDT"]);
    store.add_exchange("kraken", ["BTC/USD"]);
    let h = harness(store, ServiceConfig::default());

    // binance never connects during startup.
    h.factory.get("binance").fail_next_connects(1);
    h.daemon.start().await.unwrap();
    assert!(h.daemon.is_running());

    let health = h.daemon.health().await;
    assert!(health.exchanges["kraken"].connected);
    assert!(!health.exchanges["binance"].connected);

    // The healthy exchange keeps delivering.
    h.factory
        .get("kraken")
        .push_json("BTC/USD", json!({"symbol": "BTC/USD", "price": 64000.5}))
        .await;
    assert_eq!(
        h.daemon
            .manager()
            .get_ticker("kraken", "BTC/USD")
            .await
            .unwrap()
            .unwrap()
            .price,
        64000.5
    );

    h.daemon.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn terminal_handler_is_recreated_by_supervisor() {
    let store = StaticConfigStore::new("admin@fullon");
    store.add_exchange("binance", ["BTC/USDT"]);
    store.add_exchange("kraken", ["BTC/USD"]);

    let mut config = ServiceConfig::default();
    config.reconnect.max_attempts = 2;
    let h = harness(store, config);

    // Initial start plus both retries fail; the fourth connect (from the
    // supervisor's replacement handler) succeeds.
    let binance = h.factory.get("binance");
    binance.fail_next_connects(3);

    h.daemon.start().await.unwrap();

    // Backoff 2s + 4s exhausts the budget; handler goes terminal.
    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(h.daemon.health().await.exchanges["binance"].state, "error");

    // Supervisor sweeps every 10s and replaces the corpse.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let health = h.daemon.health().await;
    assert!(health.exchanges["binance"].connected);
    assert_eq!(health.exchanges["binance"].reconnect_count, 0);
    assert_eq!(binance.connect_calls(), 4);

    h.daemon.stop().await.unwrap();
}

#[tokio::test]
async fn health_entries_track_daemon_and_subscriptions() {
    let h = harness(binance_store(), ServiceConfig::default());
    h.daemon.start().await.unwrap();

    let components: Vec<String> = h
        .process_store
        .active_processes()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.component)
        .collect();
    assert!(components.contains(&"ticker_daemon".to_string()));
    assert!(components.contains(&"binance:BTC/USDT".to_string()));
    assert!(components.contains(&"binance:ETH/USDT".to_string()));

    h.daemon.stop().await.unwrap();
    assert!(h.process_store.active_processes().await.unwrap().is_empty());
}

#[tokio::test]
async fn process_ticker_rejects_error_state_daemon() {
    let h = harness(StaticConfigStore::new("admin@fullon"), ServiceConfig::default());
    assert!(matches!(
        h.daemon.start().await.unwrap_err(),
        TickerError::Startup(_)
    ));
    assert_eq!(h.daemon.status(), DaemonStatus::Error);

    let err = h
        .daemon
        .process_ticker(&SymbolDescriptor::new("BTC/USDT", 1, "binance"))
        .await
        .unwrap_err();
    assert!(matches!(err, TickerError::InconsistentState(_)));
}

#[tokio::test]
async fn process_ticker_spawns_handler_for_unknown_exchange() {
    let h = harness(binance_store(), ServiceConfig::default());
    h.daemon.start().await.unwrap();

    h.daemon
        .process_ticker(&SymbolDescriptor::new("DOGE/USDT", 9, "gateio"))
        .await
        .unwrap();

    let health = h.daemon.health().await;
    assert!(health.exchanges.contains_key("gateio"));
    assert!(health.exchanges["gateio"].connected);

    h.factory
        .get("gateio")
        .push_json("DOGE/USDT", json!({"symbol": "DOGE/USDT", "price": 0.31}))
        .await;
    assert!(h
        .daemon
        .manager()
        .get_ticker("gateio", "DOGE/USDT")
        .await
        .unwrap()
        .is_some());

    h.daemon.stop().await.unwrap();
}

#[tokio::test]
async fn last_writer_wins_per_key() {
    let h = harness(binance_store(), ServiceConfig::default());
    h.daemon.start().await.unwrap();

    let connector = h.factory.get("binance");
    connector
        .push_json("BTC/USDT", json!({"symbol": "BTC/USDT", "price": 100.0, "time": 1.0}))
        .await;
    connector
        .push_json("BTC/USDT", json!({"symbol": "BTC/USDT", "price": 101.0, "time": 2.0}))
        .await;

    let tick = h
        .daemon
        .manager()
        .get_ticker("binance", "BTC/USDT")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tick.price, 101.0);
    assert_eq!(h.daemon.manager().stats().total_tickers, 2);

    h.daemon.stop().await.unwrap();
}
