use std::collections::HashMap;

use async_trait::async_trait;

use crate::{Candle, Fill, MarketSnapshot, Order, Result, SymbolFilters};

/// Abstraction over the exchange connection.
///
/// `BinanceClient` implements this for live trading.
/// `PaperClient` implements this for simulation.
///
/// Traders never hold a `dyn ExchangeClient` directly. Order flow goes
/// through an [`OrderGateway`] and balance reads through an [`AccountGateway`].
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Submit an order and return the fill confirmation.
    async fn submit_order(&self, order: &Order) -> Result<Fill>;

    /// Free balance per asset.
    async fn balances(&self) -> Result<HashMap<String, f64>>;

    /// Most recent candles for a symbol, oldest first.
    async fn klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>>;

    /// Get the latest price for a symbol.
    async fn current_price(&self, symbol: &str) -> Result<f64>;

    /// Lot size and notional limits for a symbol.
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters>;
}

/// Balance lookups consumed by the trader.
///
/// Must return `0.0` rather than an error when the asset or the account data
/// is unavailable, so balance comparisons stay total.
#[async_trait]
pub trait AccountGateway: Send + Sync {
    async fn get_balance(&self, asset: &str) -> f64;

    /// Drop any cached balances so the next read hits the exchange.
    async fn invalidate(&self);
}

/// Order submission consumed by the trader.
///
/// Both calls retry transient failures internally and return `false` only
/// once every attempt is exhausted or the size was rejected up front.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_buy(&self, symbol: &str, quote_amount: f64) -> bool;

    async fn place_sell(&self, symbol: &str, base_amount: f64) -> bool;
}

/// Source of per-poll market snapshots.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// `None` when price data could not be obtained this poll.
    async fn get_snapshot(&self, symbol: &str, interval: &str) -> Option<MarketSnapshot>;
}
