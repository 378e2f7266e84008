use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use common::{Error, ExchangeClient, Order, OrderGateway, Result, SymbolFilters};

/// Fixed-delay retry bounds for order submission.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Order gateway in front of an [`ExchangeClient`].
///
/// Rejects unusable sizes before contacting the order endpoint, retries
/// everything else up to the policy bound, and in dry-run mode reports a
/// simulated success without touching the exchange at all.
pub struct OrderManager {
    client: Arc<dyn ExchangeClient>,
    retry: RetryPolicy,
    dry_run: bool,
    /// Exchange trading rules, fetched once per symbol.
    filters: Mutex<HashMap<String, SymbolFilters>>,
}

impl OrderManager {
    pub fn new(client: Arc<dyn ExchangeClient>, retry: RetryPolicy, dry_run: bool) -> Self {
        info!(attempts = retry.attempts, delay = ?retry.delay, dry_run, "OrderManager initialized");
        Self {
            client,
            retry,
            dry_run,
            filters: Mutex::new(HashMap::new()),
        }
    }

    async fn filters_for(&self, symbol: &str) -> Result<SymbolFilters> {
        let mut cache = self.filters.lock().await;
        if let Some(filters) = cache.get(symbol) {
            return Ok(*filters);
        }
        let filters = self.client.symbol_filters(symbol).await?;
        cache.insert(symbol.to_string(), filters);
        Ok(filters)
    }

    async fn sized_buy(&self, symbol: &str, quote_amount: f64) -> Result<Order> {
        let filters = self.filters_for(symbol).await?;
        if quote_amount < filters.min_notional {
            return Err(Error::Sizing(format!(
                "buy of {quote_amount} is below the minimum notional {}",
                filters.min_notional
            )));
        }
        Ok(Order::market_buy(symbol, quote_amount))
    }

    async fn sized_sell(&self, symbol: &str, base_amount: f64) -> Result<Order> {
        let filters = self.filters_for(symbol).await?;
        let quantity = filters.round_quantity(base_amount);
        if quantity <= 0.0 || quantity < filters.min_qty {
            return Err(Error::Sizing(format!(
                "sell of {base_amount} rounds to {quantity}, below the minimum quantity {}",
                filters.min_qty
            )));
        }
        Ok(Order::market_sell(symbol, quantity))
    }

    /// Build and submit a fresh order per attempt until one fills.
    async fn submit_with_retry<F, Fut>(&self, symbol: &str, label: &str, build: F) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Order>>,
    {
        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            let result = match build().await {
                Ok(order) => self.client.submit_order(&order).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(fill) => {
                    info!(
                        symbol = %fill.symbol,
                        side = %fill.side,
                        price = fill.price,
                        qty = fill.quantity,
                        attempt,
                        "{label} filled"
                    );
                    return true;
                }
                Err(Error::Sizing(reason)) => {
                    warn!(%symbol, %reason, "{label} rejected before submission");
                    return false;
                }
                Err(e) if !e.is_transient() => {
                    warn!(%symbol, attempt, error = %e, "{label} failed, not retryable");
                    return false;
                }
                Err(e) => {
                    warn!(%symbol, attempt, attempts, error = %e, "{label} attempt failed");
                    if attempt < attempts && !self.retry.delay.is_zero() {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }
        warn!(%symbol, attempts, "{label} failed after all attempts");
        false
    }
}

#[async_trait]
impl OrderGateway for OrderManager {
    async fn place_buy(&self, symbol: &str, quote_amount: f64) -> bool {
        if !(quote_amount.is_finite() && quote_amount > 0.0) {
            warn!(%symbol, quote_amount, "Buy rejected: non-positive amount");
            return false;
        }
        if self.dry_run {
            info!(%symbol, quote_amount, "[DRY-RUN] buy simulated");
            return true;
        }
        self.submit_with_retry(symbol, "Buy", || self.sized_buy(symbol, quote_amount))
            .await
    }

    async fn place_sell(&self, symbol: &str, base_amount: f64) -> bool {
        if !(base_amount.is_finite() && base_amount > 0.0) {
            warn!(%symbol, base_amount, "Sell rejected: non-positive amount");
            return false;
        }
        if self.dry_run {
            info!(%symbol, base_amount, "[DRY-RUN] sell simulated");
            return true;
        }
        self.submit_with_retry(symbol, "Sell", || self.sized_sell(symbol, base_amount))
            .await
    }
}
