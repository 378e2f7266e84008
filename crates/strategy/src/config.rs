use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use common::{Error, Result};

/// Top-level strategy config file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// poll_interval_secs = 60
///
/// [market]
/// rsi_period = 2
///
/// [[strategy]]
/// name = "BTC RSI dip"
/// symbol = "BTCEUR"
/// indicators = ["rsi"]
/// amount = 19.0
/// pct = 0.3
///
/// [strategy.params]
/// rsi = 10
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    /// Seconds between poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub market: MarketSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(rename = "strategy", default)]
    pub strategies: Vec<StrategyConfig>,
}

/// How snapshots are computed from klines. Shared by every strategy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MarketSettings {
    pub candle_limit: usize,
    pub rsi_period: usize,
    pub ema_period: usize,
    pub bollinger_period: usize,
    pub bollinger_std_dev: f64,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            candle_limit: 100,
            rsi_period: 2,
            ema_period: 20,
            bollinger_period: 20,
            bollinger_std_dev: 2.0,
        }
    }
}

/// Order submission retry bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Human-readable name shown in logs and Telegram.
    pub name: String,
    /// Trading symbol, e.g. "BTCEUR".
    pub symbol: String,
    /// Asset bought and sold. Derived from `symbol` when omitted.
    pub base_asset: Option<String>,
    /// Asset paid with. Derived from `symbol` when omitted.
    pub quote_asset: Option<String>,
    /// Kline interval the indicators are computed on.
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Entry indicators, all of which must pass: "rsi", "ema", "bollinger", "rsi_bollinger".
    pub indicators: Vec<String>,
    /// Order size in quote currency.
    pub amount: f64,
    /// Take-profit target in percent (1.0 = +1%).
    pub pct: f64,
    /// Stop-loss in percent below entry. No stop-loss when omitted.
    pub max_loss_pct: Option<f64>,
    /// Indicator thresholds: `rsi`, `ema_delta`, `bollinger_margin`.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

impl StrategyFileConfig {
    /// Load from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read strategy config at '{path}': {e}"))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("strategy config at '{path}': {e}")))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let m = &self.market;
        let problem = if self.poll_interval_secs == 0 {
            Some("poll_interval_secs must be positive")
        } else if m.candle_limit == 0 {
            Some("market.candle_limit must be positive")
        } else if m.rsi_period < 2 {
            Some("market.rsi_period must be at least 2")
        } else if m.ema_period == 0 {
            Some("market.ema_period must be positive")
        } else if m.bollinger_period < 2 {
            Some("market.bollinger_period must be at least 2")
        } else if !(m.bollinger_std_dev.is_finite() && m.bollinger_std_dev > 0.0) {
            Some("market.bollinger_std_dev must be positive")
        } else {
            None
        };
        match problem {
            Some(msg) => Err(Error::Config(msg.into())),
            None => Ok(()),
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}

fn default_interval() -> String {
    "1m".to_string()
}
