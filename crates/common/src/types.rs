use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Keys under which indicator values are published in a [`MarketSnapshot`].
pub mod indicator {
    pub const RSI: &str = "rsi";
    pub const EMA: &str = "ema";
    pub const BOLLINGER_LOWER: &str = "bollinger_lower";
    pub const BOLLINGER_MIDDLE: &str = "bollinger_middle";
    pub const BOLLINGER_UPPER: &str = "bollinger_upper";
}

/// One kline from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: DateTime<Utc>,
}

/// Market state for one (symbol, interval) pair, produced once per poll.
///
/// Indicator values are stored by name. A missing name means the indicator
/// could not be computed this poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub interval: String,
    /// Latest close price.
    pub price: f64,
    indicators: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            price,
            indicators: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach an indicator value. `None` and non-finite values are left out.
    pub fn with_indicator(mut self, name: &str, value: Option<f64>) -> Self {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.indicators.insert(name.to_string(), v);
        }
        self
    }

    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied()
    }

    pub fn indicators(&self) -> impl Iterator<Item = (&str, f64)> {
        self.indicators.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// How much to trade. Buys are sized in quote currency, sells in base asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderSize {
    Quote(f64),
    Base(f64),
}

/// A market order to be submitted to the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Client order id, unique per submission attempt.
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub size: OrderSize,
}

impl Order {
    pub fn market_buy(symbol: impl Into<String>, quote_amount: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            symbol: symbol.into(),
            side: OrderSide::Buy,
            size: OrderSize::Quote(quote_amount),
        }
    }

    pub fn market_sell(symbol: impl Into<String>, base_amount: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            symbol: symbol.into(),
            side: OrderSide::Sell,
            size: OrderSize::Base(base_amount),
        }
    }
}

/// Confirmation of a filled order returned by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    /// Average fill price.
    pub price: f64,
    /// Filled base quantity.
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}

/// Exchange trading rules for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolFilters {
    /// Base quantity increment.
    pub step_size: f64,
    /// Smallest base quantity the exchange accepts.
    pub min_qty: f64,
    /// Smallest order value in quote currency.
    pub min_notional: f64,
}

impl SymbolFilters {
    /// Round a base quantity down to the lot step.
    pub fn round_quantity(&self, quantity: f64) -> f64 {
        if self.step_size <= 0.0 {
            return quantity;
        }
        // Nudge before flooring so 0.3 / 0.1 does not land on 2.999...
        let steps = (quantity / self.step_size + 1e-9).floor();
        steps * self.step_size
    }
}

/// Why a position was closed. Only used to classify trade counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOutcome {
    TakeProfit,
    StopLoss,
    Manual,
}

impl std::fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeOutcome::TakeProfit => write!(f, "take-profit"),
            TradeOutcome::StopLoss => write!(f, "stop-loss"),
            TradeOutcome::Manual => write!(f, "manual"),
        }
    }
}

/// Result of evaluating a strategy against one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Enter,
    Exit(TradeOutcome),
    Hold,
}

/// Open/flat state of a position. Entry data only exists while open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PositionStatus {
    Flat,
    Open {
        entry_price: f64,
        quantity: f64,
        opened_at: DateTime<Utc>,
    },
}

/// The single position owned by one trader, plus its trade counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    status: PositionStatus,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            status: PositionStatus::Flat,
            trades: 0,
            wins: 0,
            losses: 0,
        }
    }
}

impl Position {
    pub fn status(&self) -> &PositionStatus {
        &self.status
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, PositionStatus::Open { .. })
    }

    pub fn entry_price(&self) -> Option<f64> {
        match self.status {
            PositionStatus::Open { entry_price, .. } => Some(entry_price),
            PositionStatus::Flat => None,
        }
    }

    pub fn quantity(&self) -> Option<f64> {
        match self.status {
            PositionStatus::Open { quantity, .. } => Some(quantity),
            PositionStatus::Flat => None,
        }
    }

    /// Record a confirmed buy. Callers must pass a positive price and quantity.
    pub fn open(&mut self, entry_price: f64, quantity: f64) {
        debug_assert!(entry_price > 0.0 && quantity > 0.0);
        self.status = PositionStatus::Open {
            entry_price,
            quantity,
            opened_at: Utc::now(),
        };
    }

    /// Record a confirmed sell: bump the counters once and go flat.
    /// Returns the closed `(entry_price, quantity)`, or `None` if already flat.
    pub fn close(&mut self, outcome: TradeOutcome) -> Option<(f64, f64)> {
        let closed = match self.status {
            PositionStatus::Open {
                entry_price,
                quantity,
                ..
            } => (entry_price, quantity),
            PositionStatus::Flat => return None,
        };
        self.trades += 1;
        match outcome {
            TradeOutcome::TakeProfit => self.wins += 1,
            TradeOutcome::StopLoss => self.losses += 1,
            TradeOutcome::Manual => {}
        }
        self.status = PositionStatus::Flat;
        Some(closed)
    }

    /// Percentage of completed trades that hit take-profit.
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64 * 100.0
        }
    }
}

/// Whether the bot is running against the real exchange or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// Events emitted by traders for the notification channel.
#[derive(Debug, Clone)]
pub enum TradeEvent {
    Entered {
        strategy: String,
        symbol: String,
        price: f64,
        quantity: f64,
    },
    Exited {
        strategy: String,
        symbol: String,
        entry_price: f64,
        exit_price: f64,
        quantity: f64,
        outcome: TradeOutcome,
    },
    EntrySkipped {
        strategy: String,
        symbol: String,
        balance: f64,
        required: f64,
    },
    OrderFailed {
        strategy: String,
        symbol: String,
        side: OrderSide,
    },
}
