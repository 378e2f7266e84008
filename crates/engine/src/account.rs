use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use common::{AccountGateway, ExchangeClient};

/// Account gateway that caches the full balance sheet for a bounded window.
///
/// Shared by every trader. Reads inside the window may be stale: a balance
/// spent outside this process stays visible until the window expires or a
/// trader invalidates the cache after one of its own fills.
pub struct AccountCache {
    client: Arc<dyn ExchangeClient>,
    ttl: Duration,
    cached: Mutex<Option<CachedBalances>>,
}

struct CachedBalances {
    fetched_at: Instant,
    balances: HashMap<String, f64>,
}

impl AccountCache {
    pub fn new(client: Arc<dyn ExchangeClient>, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AccountGateway for AccountCache {
    async fn get_balance(&self, asset: &str) -> f64 {
        let mut cached = self.cached.lock().await;

        let fresh = cached
            .as_ref()
            .is_some_and(|c| c.fetched_at.elapsed() < self.ttl);
        if !fresh {
            match self.client.balances().await {
                Ok(balances) => {
                    debug!(assets = balances.len(), "Balances refreshed");
                    *cached = Some(CachedBalances {
                        fetched_at: Instant::now(),
                        balances,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Balance refresh failed, reporting zero");
                    *cached = None;
                    return 0.0;
                }
            }
        }

        cached
            .as_ref()
            .and_then(|c| c.balances.get(asset).copied())
            .unwrap_or(0.0)
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use common::{Candle, Error, Fill, Order, Result, SymbolFilters};

    struct CountingExchange {
        calls: AtomicU32,
        fail: AtomicBool,
        eur: std::sync::Mutex<f64>,
    }

    impl CountingExchange {
        fn new(eur: f64) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail: AtomicBool::new(false),
                eur: std::sync::Mutex::new(eur),
            })
        }
    }

    #[async_trait]
    impl ExchangeClient for CountingExchange {
        async fn submit_order(&self, _: &Order) -> Result<Fill> {
            Err(Error::Other("unused".into()))
        }

        async fn balances(&self) -> Result<HashMap<String, f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Http("connection reset".into()));
            }
            Ok(HashMap::from([("EUR".to_string(), *self.eur.lock().unwrap())]))
        }

        async fn klines(&self, _: &str, _: &str, _: usize) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        async fn current_price(&self, _: &str) -> Result<f64> {
            Ok(0.0)
        }

        async fn symbol_filters(&self, _: &str) -> Result<SymbolFilters> {
            Err(Error::Other("unused".into()))
        }
    }

    #[tokio::test]
    async fn serves_reads_from_cache_within_window() {
        let exchange = CountingExchange::new(50.0);
        let account = AccountCache::new(exchange.clone(), Duration::from_secs(300));

        assert_eq!(account.get_balance("EUR").await, 50.0);
        assert_eq!(account.get_balance("EUR").await, 50.0);
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_balance_is_visible_until_invalidated() {
        let exchange = CountingExchange::new(50.0);
        let account = AccountCache::new(exchange.clone(), Duration::from_secs(300));

        assert_eq!(account.get_balance("EUR").await, 50.0);
        // Spent elsewhere; the cache keeps reporting the old value.
        *exchange.eur.lock().unwrap() = 5.0;
        assert_eq!(account.get_balance("EUR").await, 50.0);

        account.invalidate().await;
        assert_eq!(account.get_balance("EUR").await, 5.0);
    }

    #[tokio::test]
    async fn expired_window_refetches() {
        let exchange = CountingExchange::new(50.0);
        let account = AccountCache::new(exchange.clone(), Duration::ZERO);

        account.get_balance("EUR").await;
        account.get_balance("EUR").await;
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_asset_and_errors_read_as_zero() {
        let exchange = CountingExchange::new(50.0);
        let account = AccountCache::new(exchange.clone(), Duration::from_secs(300));

        assert_eq!(account.get_balance("DOGE").await, 0.0);

        account.invalidate().await;
        exchange.fail.store(true, Ordering::SeqCst);
        assert_eq!(account.get_balance("EUR").await, 0.0);
    }
}
