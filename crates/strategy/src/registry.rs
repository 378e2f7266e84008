use std::collections::HashMap;
use std::str::FromStr;

use tracing::{info, warn};

use common::{indicator, Error, MarketSnapshot, Result};

use crate::config::{StrategyConfig, StrategyFileConfig};

/// Quote currencies recognised when splitting a symbol into base/quote.
const KNOWN_QUOTES: &[&str] = &["USDT", "USDC", "FDUSD", "BUSD", "EUR", "GBP", "TRY", "BTC", "ETH", "BNB"];

/// Entry indicators a strategy can be built from.
///
/// Names are resolved once at load time. An unknown name is a configuration
/// error, never a silently skipped check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorKind {
    /// `rsi < threshold`
    Rsi,
    /// `(price - ema) / ema * 100 <= ema_delta`
    Ema,
    /// `price <= lower * (1 + bollinger_margin)`
    Bollinger,
    /// `Rsi` and `Bollinger` together.
    RsiBollinger,
}

impl FromStr for IndicatorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "rsi" => Ok(IndicatorKind::Rsi),
            "ema" | "ema_delta" => Ok(IndicatorKind::Ema),
            "bollinger" => Ok(IndicatorKind::Bollinger),
            "rsi_bollinger" => Ok(IndicatorKind::RsiBollinger),
            other => Err(Error::Config(format!("unknown indicator '{other}'"))),
        }
    }
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndicatorKind::Rsi => write!(f, "rsi"),
            IndicatorKind::Ema => write!(f, "ema"),
            IndicatorKind::Bollinger => write!(f, "bollinger"),
            IndicatorKind::RsiBollinger => write!(f, "rsi_bollinger"),
        }
    }
}

impl IndicatorKind {
    /// Evaluate the entry predicate. Missing snapshot data fails the check.
    pub fn passes(&self, snapshot: &MarketSnapshot, thresholds: &Thresholds) -> bool {
        match self {
            IndicatorKind::Rsi => rsi_below(snapshot, thresholds.rsi),
            IndicatorKind::Ema => ema_within(snapshot, thresholds.ema_delta),
            IndicatorKind::Bollinger => near_lower_band(snapshot, thresholds.bollinger_margin),
            IndicatorKind::RsiBollinger => {
                rsi_below(snapshot, thresholds.rsi)
                    && near_lower_band(snapshot, thresholds.bollinger_margin)
            }
        }
    }
}

fn rsi_below(snapshot: &MarketSnapshot, threshold: f64) -> bool {
    snapshot
        .indicator(indicator::RSI)
        .is_some_and(|rsi| rsi < threshold)
}

fn ema_within(snapshot: &MarketSnapshot, delta_pct: f64) -> bool {
    match snapshot.indicator(indicator::EMA) {
        Some(ema) if ema != 0.0 => (snapshot.price - ema) / ema * 100.0 <= delta_pct,
        _ => false,
    }
}

fn near_lower_band(snapshot: &MarketSnapshot, margin: f64) -> bool {
    snapshot
        .indicator(indicator::BOLLINGER_LOWER)
        .is_some_and(|lower| snapshot.price <= lower * (1.0 + margin))
}

/// Per-indicator entry thresholds with their defaults substituted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// RSI ceiling for entry.
    pub rsi: f64,
    /// Maximum distance above the EMA, in percent.
    pub ema_delta: f64,
    /// Fraction applied to the lower band, e.g. `-0.005` requires 0.5% below it.
    pub bollinger_margin: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            rsi: 10.0,
            ema_delta: 1.0,
            bollinger_margin: 0.0,
        }
    }
}

impl Thresholds {
    const KEYS: [&'static str; 3] = ["rsi", "ema_delta", "bollinger_margin"];

    fn from_params(params: &HashMap<String, toml::Value>) -> Result<Self> {
        for key in params.keys() {
            if !Self::KEYS.contains(&key.as_str()) {
                warn!(param = %key, "Ignoring unrecognised strategy parameter");
            }
        }
        let defaults = Self::default();
        Ok(Self {
            rsi: param_f64(params, "rsi", defaults.rsi)?,
            ema_delta: param_f64(params, "ema_delta", defaults.ema_delta)?,
            bollinger_margin: param_f64(params, "bollinger_margin", defaults.bollinger_margin)?,
        })
    }
}

fn param_f64(params: &HashMap<String, toml::Value>, key: &str, default: f64) -> Result<f64> {
    match params.get(key) {
        None => Ok(default),
        Some(toml::Value::Float(v)) => Ok(*v),
        Some(toml::Value::Integer(v)) => Ok(*v as f64),
        Some(other) => Err(Error::Config(format!(
            "parameter '{key}' must be a number, got {other}"
        ))),
    }
}

/// A validated strategy, immutable for the lifetime of its trader.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategySpec {
    pub name: String,
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub interval: String,
    /// Entry requires every one of these to pass.
    pub indicators: Vec<IndicatorKind>,
    pub thresholds: Thresholds,
    /// Take-profit as a fraction (0.01 = +1%).
    pub target_pct: f64,
    /// Stop-loss as a fraction below entry.
    pub stop_pct: Option<f64>,
    /// Order size in quote currency.
    pub amount: f64,
}

impl StrategySpec {
    pub fn from_config(cfg: &StrategyConfig) -> Result<Self> {
        let invalid = |msg: String| Error::Config(format!("strategy '{}': {msg}", cfg.name));

        if cfg.indicators.is_empty() {
            return Err(invalid("at least one indicator is required".into()));
        }
        let indicators = cfg
            .indicators
            .iter()
            .map(|name| name.parse::<IndicatorKind>())
            .collect::<Result<Vec<_>>>()
            .map_err(|e| invalid(e.to_string()))?;

        if !(cfg.amount.is_finite() && cfg.amount > 0.0) {
            return Err(invalid(format!("amount must be positive, got {}", cfg.amount)));
        }
        if !(cfg.pct.is_finite() && cfg.pct > 0.0) {
            return Err(invalid(format!("pct must be positive, got {}", cfg.pct)));
        }
        if let Some(stop) = cfg.max_loss_pct {
            if !(stop.is_finite() && stop > 0.0) {
                return Err(invalid(format!("max_loss_pct must be positive, got {stop}")));
            }
        }

        let (base_asset, quote_asset) = match (&cfg.base_asset, &cfg.quote_asset) {
            (Some(base), Some(quote)) => (base.clone(), quote.clone()),
            _ => split_symbol(&cfg.symbol).ok_or_else(|| {
                invalid(format!(
                    "cannot derive assets from symbol '{}', set base_asset and quote_asset",
                    cfg.symbol
                ))
            })?,
        };

        Ok(Self {
            name: cfg.name.clone(),
            symbol: cfg.symbol.to_uppercase(),
            base_asset,
            quote_asset,
            interval: cfg.interval.clone(),
            indicators,
            thresholds: Thresholds::from_params(&cfg.params).map_err(|e| invalid(e.to_string()))?,
            target_pct: cfg.pct / 100.0,
            stop_pct: cfg.max_loss_pct.map(|p| p / 100.0),
            amount: cfg.amount,
        })
    }

    /// Validate every strategy in the file. Fails on the first invalid one.
    pub fn load_all(file_cfg: &StrategyFileConfig) -> Result<Vec<Self>> {
        file_cfg
            .strategies
            .iter()
            .map(|cfg| {
                let spec = Self::from_config(cfg)?;
                info!(
                    name = %spec.name,
                    symbol = %spec.symbol,
                    indicators = ?spec.indicators,
                    "Registered strategy"
                );
                Ok(spec)
            })
            .collect()
    }

    /// Price at which the take-profit exit fires.
    pub fn target_price(&self, entry_price: f64) -> f64 {
        entry_price * (1.0 + self.target_pct)
    }
}

fn split_symbol(symbol: &str) -> Option<(String, String)> {
    let upper = symbol.to_uppercase();
    KNOWN_QUOTES.iter().find_map(|quote| {
        upper
            .strip_suffix(quote)
            .filter(|base| !base.is_empty())
            .map(|base| (base.to_string(), quote.to_string()))
    })
}
