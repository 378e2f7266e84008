use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    Candle, Error, ExchangeClient, Fill, Order, OrderSide, OrderSize, Result, SymbolFilters,
};

/// Simulated exchange client for paper trading.
///
/// Market data, prices and trading rules come from a real client; fills are
/// simulated at the current price with configurable slippage against an
/// in-memory balance sheet. No order ever reaches the exchange.
pub struct PaperClient {
    market: Arc<dyn ExchangeClient>,
    /// Simulated free balances, keyed by asset.
    balances: RwLock<HashMap<String, f64>>,
    /// Symbol -> (base asset, quote asset).
    symbols: HashMap<String, (String, String)>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

impl PaperClient {
    pub fn new(market: Arc<dyn ExchangeClient>, slippage_bps: f64) -> Self {
        info!(slippage_bps, "PaperClient initialized");
        Self {
            market,
            balances: RwLock::new(HashMap::new()),
            symbols: HashMap::new(),
            slippage_bps,
        }
    }

    /// Register a tradable symbol and its asset pair.
    pub fn with_symbol(
        mut self,
        symbol: impl Into<String>,
        base: impl Into<String>,
        quote: impl Into<String>,
    ) -> Self {
        self.symbols.insert(symbol.into(), (base.into(), quote.into()));
        self
    }

    /// Seed an asset balance. Repeated calls for the same asset overwrite.
    pub fn with_balance(mut self, asset: impl Into<String>, amount: f64) -> Self {
        self.balances.get_mut().insert(asset.into(), amount);
        self
    }

    fn fill_price(&self, side: OrderSide, mid: f64) -> f64 {
        // Buys pay more, sells receive less
        match side {
            OrderSide::Buy => mid * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid * (1.0 - self.slippage_bps / 10_000.0),
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    async fn submit_order(&self, order: &Order) -> Result<Fill> {
        let (base, quote) = self.symbols.get(&order.symbol).ok_or_else(|| {
            Error::Exchange(format!("PaperClient does not trade '{}'", order.symbol))
        })?;
        let mid = self.market.current_price(&order.symbol).await?;
        let fill_price = self.fill_price(order.side, mid);

        let mut balances = self.balances.write().await;
        let held = |asset: &str| balances.get(asset).copied().unwrap_or(0.0);

        let (quantity, quote_amount) = match (order.side, order.size) {
            (OrderSide::Buy, OrderSize::Quote(spend)) => (spend / fill_price, spend),
            (OrderSide::Buy, OrderSize::Base(qty)) => (qty, qty * fill_price),
            (OrderSide::Sell, OrderSize::Base(qty)) => (qty, qty * fill_price),
            (OrderSide::Sell, OrderSize::Quote(receive)) => (receive / fill_price, receive),
        };

        match order.side {
            OrderSide::Buy if held(quote) < quote_amount => {
                return Err(Error::Exchange(format!(
                    "insufficient {quote}: have {}, need {quote_amount}",
                    held(quote)
                )));
            }
            OrderSide::Sell if held(base) < quantity => {
                return Err(Error::Exchange(format!(
                    "insufficient {base}: have {}, need {quantity}",
                    held(base)
                )));
            }
            _ => {}
        }

        let (base_delta, quote_delta) = match order.side {
            OrderSide::Buy => (quantity, -quote_amount),
            OrderSide::Sell => (-quantity, quote_amount),
        };
        *balances.entry(base.clone()).or_default() += base_delta;
        *balances.entry(quote.clone()).or_default() += quote_delta;

        debug!(
            symbol = %order.symbol,
            side = %order.side,
            mid,
            fill = fill_price,
            qty = quantity,
            "Paper fill simulated"
        );

        Ok(Fill {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            price: fill_price,
            quantity,
            timestamp: Utc::now(),
        })
    }

    async fn balances(&self) -> Result<HashMap<String, f64>> {
        Ok(self.balances.read().await.clone())
    }

    async fn klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        self.market.klines(symbol, interval, limit).await
    }

    async fn current_price(&self, symbol: &str) -> Result<f64> {
        self.market.current_price(symbol).await
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        self.market.symbol_filters(symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPrice(f64);

    #[async_trait]
    impl ExchangeClient for FixedPrice {
        async fn submit_order(&self, _: &Order) -> Result<Fill> {
            Err(Error::Other("market client must not receive orders".into()))
        }

        async fn balances(&self) -> Result<HashMap<String, f64>> {
            Ok(HashMap::new())
        }

        async fn klines(&self, _: &str, _: &str, _: usize) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        async fn current_price(&self, _: &str) -> Result<f64> {
            Ok(self.0)
        }

        async fn symbol_filters(&self, _: &str) -> Result<SymbolFilters> {
            Ok(SymbolFilters {
                step_size: 0.0001,
                min_qty: 0.0001,
                min_notional: 5.0,
            })
        }
    }

    fn client(slippage_bps: f64, eur: f64) -> PaperClient {
        PaperClient::new(Arc::new(FixedPrice(1000.0)), slippage_bps)
            .with_symbol("BTCEUR", "BTC", "EUR")
            .with_balance("EUR", eur)
    }

    #[tokio::test]
    async fn paper_buy_fill_applies_positive_slippage() {
        let client = client(10.0, 100.0);

        let fill = client
            .submit_order(&Order::market_buy("BTCEUR", 10.0))
            .await
            .unwrap();

        let expected = 1000.0 * (1.0 + 10.0 / 10_000.0);
        assert!((fill.price - expected).abs() < 1e-6, "fill {}", fill.price);
        assert!((fill.quantity - 10.0 / expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn paper_sell_fill_applies_negative_slippage() {
        let client = client(10.0, 100.0).with_balance("BTC", 0.01);

        let fill = client
            .submit_order(&Order::market_sell("BTCEUR", 0.01))
            .await
            .unwrap();

        let expected = 1000.0 * (1.0 - 10.0 / 10_000.0);
        assert!((fill.price - expected).abs() < 1e-6, "fill {}", fill.price);
    }

    #[tokio::test]
    async fn fills_move_balances() {
        let client = client(0.0, 100.0);

        client
            .submit_order(&Order::market_buy("BTCEUR", 50.0))
            .await
            .unwrap();
        let after_buy = client.balances().await.unwrap();
        assert_eq!(after_buy["EUR"], 50.0);
        assert!((after_buy["BTC"] - 0.05).abs() < 1e-12);

        client
            .submit_order(&Order::market_sell("BTCEUR", 0.05))
            .await
            .unwrap();
        let after_sell = client.balances().await.unwrap();
        assert!((after_sell["EUR"] - 100.0).abs() < 1e-9);
        assert!(after_sell["BTC"].abs() < 1e-12);
    }

    #[tokio::test]
    async fn insufficient_balance_is_rejected_without_change() {
        let client = client(0.0, 5.0);

        assert!(client
            .submit_order(&Order::market_buy("BTCEUR", 10.0))
            .await
            .is_err());
        assert!(client
            .submit_order(&Order::market_sell("BTCEUR", 0.1))
            .await
            .is_err());

        let balances = client.balances().await.unwrap();
        assert_eq!(balances["EUR"], 5.0);
        assert!(!balances.contains_key("BTC"));
    }

    #[tokio::test]
    async fn unregistered_symbol_is_rejected() {
        let client = client(0.0, 100.0);
        assert!(client
            .submit_order(&Order::market_buy("ETHEUR", 10.0))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn market_data_is_delegated() {
        let client = client(0.0, 0.0);
        assert_eq!(client.current_price("BTCEUR").await.unwrap(), 1000.0);
        assert_eq!(client.symbol_filters("BTCEUR").await.unwrap().min_notional, 5.0);
    }
}
