//! Consumed configuration-store and credential capabilities.
//!
//! The relational configuration store owns exchanges, symbols and users;
//! the engine only reads it. Both capabilities are injected at daemon
//! construction so no component reaches for process-wide state.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use types::{Credentials, ExchangeCategory, SymbolDescriptor, UserExchange};

use crate::error::{Result, TickerError};

/// Read-only view of the relational configuration store.
///
/// Implementations are expected to be cache-backed; callers invalidate via
/// [`ConfigStore::invalidate_caches`] before a refresh read so they never
/// act on stale entries.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Resolve a user id from an email, if the user exists.
    async fn get_user_id(&self, email: &str) -> Result<Option<u32>>;

    /// Exchange accounts owned by a user.
    async fn get_user_exchanges(&self, user_id: u32) -> Result<Vec<UserExchange>>;

    /// Exchange categories; `all` includes disabled ones.
    async fn get_exchange_categories(&self, all: bool) -> Result<Vec<ExchangeCategory>>;

    /// Every configured symbol in one bulk read; `all` includes inactive
    /// ones. Refresh callers must use this single call and filter in
    /// memory rather than issuing per-exchange lookups.
    async fn get_symbols(&self, all: bool) -> Result<Vec<SymbolDescriptor>>;

    /// Drop any read-through caches so the next reads hit the store.
    async fn invalidate_caches(&self);
}

/// Maps an exchange account to API credentials.
///
/// Resolution failure is expected for public-data exchanges; callers fall
/// back to [`Credentials::public`].
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, account: &UserExchange) -> Result<Credentials>;
}

/// Resolver that never finds credentials; every exchange runs public-only.
pub struct PublicOnlyResolver;

impl CredentialResolver for PublicOnlyResolver {
    fn resolve(&self, account: &UserExchange) -> Result<Credentials> {
        Err(TickerError::CredentialsUnavailable {
            exchange: account.name.clone(),
        })
    }
}

/// Resolver backed by environment variables: `<NAME>_API_KEY` and
/// `<NAME>_API_SECRET`, with the account name uppercased and
/// non-alphanumerics mapped to underscores.
#[derive(Default)]
pub struct EnvCredentialResolver;

impl EnvCredentialResolver {
    fn env_prefix(account: &UserExchange) -> String {
        account
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self, account: &UserExchange) -> Result<Credentials> {
        let prefix = Self::env_prefix(account);
        let key = std::env::var(format!("{}_API_KEY", prefix));
        let secret = std::env::var(format!("{}_API_SECRET", prefix));
        match (key, secret) {
            (Ok(key), Ok(secret)) => Ok(Credentials::new(key, secret)),
            _ => Err(TickerError::CredentialsUnavailable {
                exchange: account.name.clone(),
            }),
        }
    }
}

/// Demo topology file: exchanges and their symbols.
///
/// ```toml
/// [[exchange]]
/// name = "binance"
/// symbols = ["BTC/USDT", "ETH/USDT"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopologyConfig {
    #[serde(default, rename = "exchange")]
    pub exchanges: Vec<TopologyExchange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopologyExchange {
    pub name: String,
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// In-memory [`ConfigStore`] holding a fixed admin identity and a mutable
/// topology. Backs the demo binary and the test suites; symbol changes
/// through [`StaticConfigStore::set_symbols`] are visible to the next
/// refresh, standing in for configuration edits in the real store.
pub struct StaticConfigStore {
    admin_email: String,
    user_id: u32,
    state: RwLock<Topology>,
}

#[derive(Default)]
struct Topology {
    exchanges: Vec<UserExchange>,
    categories: Vec<ExchangeCategory>,
    symbols: Vec<SymbolDescriptor>,
}

impl StaticConfigStore {
    pub fn new(admin_email: impl Into<String>) -> Self {
        Self {
            admin_email: admin_email.into(),
            user_id: 1,
            state: RwLock::new(Topology::default()),
        }
    }

    /// Build from a parsed topology file.
    pub fn from_topology(admin_email: impl Into<String>, topology: &TopologyConfig) -> Self {
        let store = Self::new(admin_email);
        for entry in &topology.exchanges {
            store.add_exchange(&entry.name, entry.symbols.iter().map(String::as_str));
        }
        store
    }

    /// Build from the TOML text of a topology file.
    pub fn from_toml_str(admin_email: impl Into<String>, toml_str: &str) -> Result<Self> {
        let topology: TopologyConfig = toml::from_str(toml_str)
            .map_err(|e| TickerError::ConfigUnavailable(format!("bad topology file: {}", e)))?;
        Ok(Self::from_topology(admin_email, &topology))
    }

    /// Small built-in topology for the demo binary.
    pub fn demo(admin_email: impl Into<String>) -> Self {
        let store = Self::new(admin_email);
        store.add_exchange("binance", ["BTC/USDT", "ETH/USDT", "ADA/USDT"]);
        store.add_exchange("kraken", ["BTC/USD", "ETH/USD"]);
        store
    }

    /// Register an exchange (category + admin account) with its symbols.
    pub fn add_exchange<'a>(
        &self,
        name: &str,
        symbols: impl IntoIterator<Item = &'a str>,
    ) -> u32 {
        let mut state = self.state.write();
        let category_id = state.categories.len() as u32 + 1;
        state.categories.push(ExchangeCategory {
            category_id,
            name: name.to_string(),
        });
        state.exchanges.push(UserExchange {
            exchange_id: category_id,
            category_id,
            name: format!("{}-main", name),
        });
        for symbol in symbols {
            state
                .symbols
                .push(SymbolDescriptor::new(symbol, category_id, name));
        }
        category_id
    }

    /// Replace the symbol list of one exchange.
    pub fn set_symbols<'a>(&self, name: &str, symbols: impl IntoIterator<Item = &'a str>) {
        let mut state = self.state.write();
        let Some(category_id) = state
            .categories
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.category_id)
        else {
            return;
        };
        state.symbols.retain(|s| s.category_id != category_id);
        for symbol in symbols {
            state
                .symbols
                .push(SymbolDescriptor::new(symbol, category_id, name));
        }
    }
}

#[async_trait]
impl ConfigStore for StaticConfigStore {
    async fn get_user_id(&self, email: &str) -> Result<Option<u32>> {
        Ok((email == self.admin_email).then_some(self.user_id))
    }

    async fn get_user_exchanges(&self, user_id: u32) -> Result<Vec<UserExchange>> {
        if user_id != self.user_id {
            return Ok(Vec::new());
        }
        Ok(self.state.read().exchanges.clone())
    }

    async fn get_exchange_categories(&self, _all: bool) -> Result<Vec<ExchangeCategory>> {
        Ok(self.state.read().categories.clone())
    }

    async fn get_symbols(&self, _all: bool) -> Result<Vec<SymbolDescriptor>> {
        Ok(self.state.read().symbols.clone())
    }

    async fn invalidate_caches(&self) {
        // Nothing cached; reads always see the current topology.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_store_serves_registered_topology() {
        let store = StaticConfigStore::new("admin@fullon");
        store.add_exchange("binance", ["BTC/USDT", "ETH/USDT"]);
        store.add_exchange("kraken", ["BTC/USD"]);

        assert_eq!(store.get_user_id("admin@fullon").await.unwrap(), Some(1));
        assert_eq!(store.get_user_id("nobody@fullon").await.unwrap(), None);

        let exchanges = store.get_user_exchanges(1).await.unwrap();
        assert_eq!(exchanges.len(), 2);

        let symbols = store.get_symbols(true).await.unwrap();
        assert_eq!(symbols.len(), 3);
        assert!(symbols
            .iter()
            .any(|s| s.symbol == "BTC/USD" && s.exchange_name == "kraken"));
    }

    #[tokio::test]
    async fn set_symbols_replaces_one_exchange_only() {
        let store = StaticConfigStore::new("admin@fullon");
        store.add_exchange("binance", ["BTC/USDT", "ETH/USDT"]);
        store.add_exchange("kraken", ["BTC/USD"]);

        store.set_symbols("binance", ["BTC/USDT", "XRP/USDT"]);

        let symbols = store.get_symbols(true).await.unwrap();
        let binance: Vec<_> = symbols
            .iter()
            .filter(|s| s.exchange_name == "binance")
            .map(|s| s.symbol.as_str())
            .collect();
        assert_eq!(binance.len(), 2);
        assert!(binance.contains(&"XRP/USDT"));
        assert!(!binance.contains(&"ETH/USDT"));
        assert_eq!(
            symbols.iter().filter(|s| s.exchange_name == "kraken").count(),
            1
        );
    }

    #[tokio::test]
    async fn topology_parses_from_toml() {
        let store = StaticConfigStore::from_toml_str(
            "admin@fullon",
            r#"
            [[exchange]]
            name = "binance"
            symbols = ["BTC/USDT"]

            [[exchange]]
            name = "kraken"
            "#,
        )
        .unwrap();

        let categories = store.get_exchange_categories(true).await.unwrap();
        assert_eq!(categories.len(), 2);
        assert_eq!(store.get_symbols(true).await.unwrap().len(), 1);
    }

    #[test]
    fn env_prefix_uppercases_and_sanitizes() {
        let account = UserExchange {
            exchange_id: 1,
            category_id: 1,
            name: "binance-main".to_string(),
        };
        assert_eq!(EnvCredentialResolver::env_prefix(&account), "BINANCE_MAIN");
    }

    #[test]
    fn public_only_resolver_always_fails() {
        let account = UserExchange {
            exchange_id: 1,
            category_id: 1,
            name: "binance-main".to_string(),
        };
        assert!(matches!(
            PublicOnlyResolver.resolve(&account),
            Err(TickerError::CredentialsUnavailable { .. })
        ));
    }
}
