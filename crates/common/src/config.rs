use tracing::warn;

use crate::TradingMode;

/// Process configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange credentials, required in live mode only
    pub binance_api_key: Option<String>,
    pub binance_secret: Option<String>,

    // Telegram, the bot stays disabled without a token
    pub telegram_token: Option<String>,
    pub telegram_allowed_user_ids: Vec<i64>,

    // Trading
    pub trading_mode: TradingMode,
    pub paper_slippage_bps: f64,
    /// Starting quote balance per quote asset in paper mode.
    pub paper_balance: f64,
    /// Staleness window of the shared balance cache.
    pub balance_cache_secs: u64,

    // Strategy config file path
    pub strategy_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let trading_mode = match lookup("TRADING_MODE")
            .unwrap_or_else(|| "paper".to_string())
            .to_lowercase()
            .as_str()
        {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => panic!("ERROR: TRADING_MODE must be 'paper' or 'live', got: '{other}'"),
        };

        let binance_api_key = lookup("BINANCE_API_KEY");
        let binance_secret = lookup("BINANCE_SECRET");
        if trading_mode == TradingMode::Live
            && (binance_api_key.is_none() || binance_secret.is_none())
        {
            panic!("BINANCE_API_KEY and BINANCE_SECRET must be set when TRADING_MODE=live. Check your .env file.");
        }

        let telegram_allowed_user_ids = lookup("TELEGRAM_ALLOWED_USER_IDS")
            .map(|ids| {
                ids.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| {
                        s.trim().parse::<i64>().unwrap_or_else(|_| {
                            panic!(
                                "TELEGRAM_ALLOWED_USER_IDS contains non-numeric ID: '{}'",
                                s.trim()
                            )
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Config {
            binance_api_key,
            binance_secret,
            telegram_token: lookup("TELEGRAM_TOKEN").filter(|t| !t.is_empty()),
            telegram_allowed_user_ids,
            trading_mode,
            paper_slippage_bps: parse_or(&lookup, "PAPER_SLIPPAGE_BPS", 10.0),
            paper_balance: parse_or(&lookup, "PAPER_BALANCE", 1_000.0),
            balance_cache_secs: parse_or(&lookup, "BALANCE_CACHE_SECS", 90),
            strategy_config_path: lookup("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Unparsable value, using default");
            default
        }),
        None => default,
    }
}
